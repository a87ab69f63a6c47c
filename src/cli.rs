use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Permit portal: phone, tablet and school-gate permit applications
#[derive(Parser)]
#[command(name = "portal", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to PORTAL_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Review applications
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Manage auto-approval policies
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },

    /// Manage the student roster
    Student {
        #[command(subcommand)]
        command: StudentCommands,
    },

    /// Gate roster spreadsheet
    Roster {
        #[command(subcommand)]
        command: RosterCommands,
    },

    /// Consent documents
    Consent {
        #[command(subcommand)]
        command: ConsentCommands,
    },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List applications, newest first
    List {
        /// pending, approved, auto_approved or rejected
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Approve an application
    Approve {
        id: i64,
        /// Use this approval number instead of allocating one
        #[arg(long)]
        number: Option<String>,
    },
    /// Reject an application
    Reject {
        id: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Return an application to pending
    Reset { id: i64 },
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Show the policy for every category
    List,
    /// Change a category's policy
    Set {
        /// phone, tablet or pass
        #[arg(long)]
        key: String,
        /// manual, immediate or delayed
        #[arg(long)]
        mode: String,
        #[arg(long, default_value = "10")]
        delay: f64,
    },
    /// Run auto-approval once
    Run,
}

#[derive(Subcommand)]
pub enum StudentCommands {
    /// Import students from a CSV file (UTF-8 or CP949)
    Import { path: PathBuf },
    /// List registered students
    List,
}

#[derive(Subcommand)]
pub enum RosterCommands {
    /// Push the approved gate roster to the spreadsheet
    Sync,
}

#[derive(Subcommand)]
pub enum ConsentCommands {
    /// Publish a new required consent document version
    Publish {
        #[arg(long, default_value = "privacy")]
        consent_type: String,
        #[arg(long)]
        title: String,
        /// File holding the document body
        #[arg(long)]
        content_file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_tree_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_port_help_names_the_config_variable() {
        let cmd = Cli::command();
        let serve = cmd.find_subcommand("serve").unwrap();
        let port = serve
            .get_arguments()
            .find(|a| a.get_id() == "port")
            .unwrap();
        let help = port.get_help().unwrap().to_string();
        assert!(help.contains("PORTAL_PORT"), "{}", help);
    }

    #[test]
    fn test_policy_run_parses() {
        let cli = Cli::try_parse_from(["portal", "policy", "run"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Policy {
                command: PolicyCommands::Run
            })
        ));
    }
}
