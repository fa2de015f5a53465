fn main() {
    // option_env!() values are cached by cargo unless it is told to watch them.
    println!("cargo:rerun-if-env-changed=CHATAPP_API_URL");
    println!("cargo:rerun-if-env-changed=CHATAPP_WS_URL");
}
