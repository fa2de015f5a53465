//! chatapp CLI - command-line client for the chatapp backend.

mod commands;
mod output;

use clap::{Parser, Subcommand};

/// chatapp CLI - Log in, read and send messages, and follow chat rooms.
#[derive(Parser)]
#[command(name = "chatapp")]
#[command(about = "chatapp command-line client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with a username (or email) and password
    Login {
        /// Username; prompted for when omitted
        #[arg(short, long)]
        username: Option<String>,
        /// Log in with an email address instead of a username
        #[arg(short, long, conflicts_with = "username")]
        email: Option<String>,
    },

    /// Create an account
    Register {
        /// Username; prompted for when omitted
        #[arg(short, long)]
        username: Option<String>,
        /// Optional email address
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Logout and clear the stored session
    Logout,

    /// Check authentication status
    Status,

    /// Show the current user
    Whoami,

    /// Change or reset your password
    Password {
        #[command(subcommand)]
        command: PasswordCommands,
    },

    /// Manage conversations
    Conversations {
        #[command(subcommand)]
        command: ConversationCommands,
    },

    /// Read, send and delete messages
    Messages {
        #[command(subcommand)]
        command: MessageCommands,
    },

    /// Mark a conversation as read
    MarkRead {
        /// Conversation ID
        conversation: i64,
    },

    /// Search users by username
    Search {
        /// At least three characters
        query: String,
    },

    /// Print realtime events for a room until Ctrl-C
    Watch {
        /// Conversation ID or slug; the conversation-list channel when omitted
        room: Option<String>,
    },
}

#[derive(Subcommand)]
enum PasswordCommands {
    /// Change the password of the logged-in account
    Change,
    /// Email a password reset link
    ResetRequest {
        /// Account email address
        email: String,
    },
    /// Set a new password with the uid and token from the reset email
    ResetConfirm {
        uid: String,
        token: String,
    },
}

#[derive(Subcommand)]
enum ConversationCommands {
    /// List your conversations
    List,
    /// Start (or reopen) a private conversation
    Start {
        /// Username of the other participant
        username: String,
    },
    /// Hide a conversation for yourself
    Hide {
        /// Conversation ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum MessageCommands {
    /// List messages in a conversation
    List {
        /// Conversation ID
        conversation: i64,
        /// Only show the last N messages
        #[arg(short = 'n', long)]
        last: Option<usize>,
    },
    /// Send a message
    Send {
        /// Conversation ID
        conversation: i64,
        /// Message text
        text: String,
    },
    /// Delete a message for yourself
    Delete {
        /// Message ID
        id: i64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let context = match commands::Context::load(cli.log_level.as_deref()) {
        Ok(context) => context,
        Err(e) => {
            output::print_error(&format!("{:#}", e), &cli.format);
            std::process::exit(1);
        }
    };

    let format = &cli.format;
    let result = match cli.command {
        Commands::Login { username, email } => {
            commands::login(&context, username, email, format).await
        }
        Commands::Register { username, email } => {
            commands::register(&context, username, email, format).await
        }
        Commands::Logout => commands::logout(&context, format).await,
        Commands::Status => commands::status(&context, format).await,
        Commands::Whoami => commands::whoami(&context, format).await,
        Commands::Password { command } => match command {
            PasswordCommands::Change => commands::password_change(&context, format).await,
            PasswordCommands::ResetRequest { email } => {
                commands::password_reset_request(&context, &email, format).await
            }
            PasswordCommands::ResetConfirm { uid, token } => {
                commands::password_reset_confirm(&context, &uid, &token, format).await
            }
        },
        Commands::Conversations { command } => match command {
            ConversationCommands::List => commands::conversations_list(&context, format).await,
            ConversationCommands::Start { username } => {
                commands::conversations_start(&context, &username, format).await
            }
            ConversationCommands::Hide { id } => {
                commands::conversations_hide(&context, id, format).await
            }
        },
        Commands::Messages { command } => match command {
            MessageCommands::List { conversation, last } => {
                commands::messages_list(&context, conversation, last, format).await
            }
            MessageCommands::Send { conversation, text } => {
                commands::messages_send(&context, conversation, &text, format).await
            }
            MessageCommands::Delete { id } => commands::messages_delete(&context, id, format).await,
        },
        Commands::MarkRead { conversation } => {
            commands::mark_read(&context, conversation, format).await
        }
        Commands::Search { query } => commands::search(&context, &query, format).await,
        Commands::Watch { room } => commands::watch(&context, room, format).await,
    };

    if let Err(e) = result {
        output::print_error(&commands::describe_error(&e), format);
        std::process::exit(1);
    }
}
