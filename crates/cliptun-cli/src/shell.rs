//! Interactive prompt shown by `cliptun client` after connecting.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::error;

use cliptun_core::tunnel::{ForwardSpec, Tunnel};

struct ShellCommand {
    name: &'static str,
    description: &'static str,
    usage: &'static str,
}

const COMMANDS: &[ShellCommand] = &[
    ShellCommand {
        name: "exec",
        description: "Execute command on remote system and print output",
        usage: "exec <cmd>",
    },
    ShellCommand {
        name: "fwd-local",
        description: "Forward local port to remote host and port",
        usage: "fwd-local <lport> <rhost> <rport>",
    },
    ShellCommand {
        name: "fwd-remote",
        description: "Forward remote port to local host and port",
        usage: "fwd-remote <rport> <lhost> <lport>",
    },
    ShellCommand {
        name: "socks",
        description: "Start SOCKS server",
        usage: "socks <port>",
    },
    ShellCommand {
        name: "sftp",
        description: "Enter sftp mode",
        usage: "sftp",
    },
    ShellCommand {
        name: "help",
        description: "Show available commands and command options",
        usage: "help [cmd]",
    },
    ShellCommand {
        name: "exit",
        description: "Quit the program",
        usage: "exit",
    },
];

fn show_help(commands: &[ShellCommand], args: &[&str]) {
    if let Some(name) = args.first() {
        match commands.iter().find(|c| c.name == *name) {
            Some(cmd) => {
                println!("{}: {}", cmd.name, cmd.description);
                println!("Usage: {}", cmd.usage);
            }
            None => println!("unknown command"),
        }
        return;
    }
    println!("Available Commands:");
    for cmd in commands {
        println!("  {}: {}", cmd.name, cmd.description);
    }
    println!("Use \"help <cmd>\" for more information about a command.");
}

fn show_usage(commands: &[ShellCommand], name: &str) {
    show_help(commands, &[name]);
}

/// Run the prompt loop until `exit` or end of input.
pub async fn run(tunnel: &Tunnel) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            error!(error = %e, "cannot create prompt");
            return;
        }
    };

    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return,
            Err(_) => {
                println!();
                continue;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        let mut words = line.split_whitespace();
        let cmd = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        match cmd {
            "exec" => {
                if args.is_empty() {
                    show_usage(COMMANDS, "exec");
                    continue;
                }
                match tunnel.execute_command(&args.join(" ")).await {
                    Ok(output) => println!("{output}"),
                    Err(e) => println!("Error executing command: {e}"),
                }
            }
            "fwd-local" => {
                let Some(spec) = forward_from_args(&args) else {
                    show_usage(COMMANDS, "fwd-local");
                    continue;
                };
                if let Err(e) = tunnel.add_local_forward(spec).await {
                    println!("Error: {e}");
                }
            }
            "fwd-remote" => {
                let Some(spec) = forward_from_args(&args) else {
                    show_usage(COMMANDS, "fwd-remote");
                    continue;
                };
                if let Err(e) = tunnel.add_remote_forward(spec).await {
                    println!("Error: {e}");
                }
            }
            "socks" => {
                let port = args.first().and_then(|p| p.parse::<u16>().ok());
                match port {
                    Some(port) => tunnel.start_socks(port).await,
                    None => show_usage(COMMANDS, "socks"),
                }
            }
            "sftp" => match tunnel.start_sftp().await {
                Ok(session) => crate::sftp_shell::run(session).await,
                Err(e) => println!("Error starting sftp: {e}"),
            },
            "help" => show_help(COMMANDS, &args),
            "exit" => return,
            _ => println!("unknown command"),
        }
    }
}

fn forward_from_args(args: &[&str]) -> Option<ForwardSpec> {
    if args.len() != 3 {
        return None;
    }
    format!("{}:{}:{}", args[0], args[1], args[2]).parse().ok()
}
