//! SFTP mode of the interactive prompt.

use humansize::{format_size, DECIMAL};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use russh_sftp::client::SftpSession;
use tracing::error;

struct SftpCommand {
    name: &'static str,
    description: &'static str,
}

const COMMANDS: &[SftpCommand] = &[
    SftpCommand {
        name: "cd",
        description: "change remote directory",
    },
    SftpCommand {
        name: "lcd",
        description: "change local directory",
    },
    SftpCommand {
        name: "ls",
        description: "list remote directory content",
    },
    SftpCommand {
        name: "lls",
        description: "list local directory content",
    },
    SftpCommand {
        name: "pwd",
        description: "print remote working directory",
    },
    SftpCommand {
        name: "lpwd",
        description: "print local working directory",
    },
    SftpCommand {
        name: "download",
        description: "download file (download <filename>)",
    },
    SftpCommand {
        name: "upload",
        description: "upload file (upload <filename>)",
    },
    SftpCommand {
        name: "help",
        description: "show available commands",
    },
    SftpCommand {
        name: "exit",
        description: "return to main menu",
    },
];

fn show_help() {
    println!("Available Commands:");
    for cmd in COMMANDS {
        println!("  {}: {}", cmd.name, cmd.description);
    }
}

/// Join `name` onto the remote working directory unless it is absolute.
fn remote_path(dir: &str, name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Run the `sftp>` prompt loop until `exit` or end of input.
pub async fn run(sftp: SftpSession) {
    let mut remote_dir = match sftp.canonicalize(".").await {
        Ok(dir) => dir,
        Err(e) => {
            error!(error = %e, "cannot get remote working directory");
            return;
        }
    };

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            error!(error = %e, "cannot create prompt");
            return;
        }
    };

    loop {
        let line = match editor.readline("sftp> ") {
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
            "cd" => {
                let Some(dir) = args.first() else {
                    println!("Usage: cd <dir>");
                    continue;
                };
                let candidate = remote_path(&remote_dir, dir);
                match sftp.canonicalize(&candidate).await {
                    Ok(resolved) => remote_dir = resolved,
                    Err(e) => println!("Error: cannot change directory: {e}"),
                }
            }
            "lcd" => {
                let Some(dir) = args.first() else {
                    println!("Usage: lcd <dir>");
                    continue;
                };
                if let Err(e) = std::env::set_current_dir(dir) {
                    println!("Error: cannot set current directory: {e}");
                }
            }
            "ls" => match sftp.read_dir(&remote_dir).await {
                Ok(entries) => {
                    for entry in entries {
                        let size = entry.metadata().size.unwrap_or(0);
                        println!("{:>10} {}", format_size(size, DECIMAL), entry.file_name());
                    }
                }
                Err(e) => println!("Error: cannot read directory content: {e}"),
            },
            "lls" => match std::fs::read_dir(".") {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                        println!(
                            "{:>10} {}",
                            format_size(size, DECIMAL),
                            entry.file_name().to_string_lossy()
                        );
                    }
                }
                Err(e) => println!("Error: cannot read directory content: {e}"),
            },
            "pwd" => println!("{remote_dir}"),
            "lpwd" => match std::env::current_dir() {
                Ok(dir) => println!("{}", dir.display()),
                Err(e) => println!("Error getting current working directory: {e}"),
            },
            "download" => {
                let Some(name) = args.first() else {
                    println!("Usage: download <filename>");
                    continue;
                };
                match download(&sftp, &remote_dir, name).await {
                    Ok(bytes) => println!("transferred {}", format_size(bytes, DECIMAL)),
                    Err(e) => println!("Error: cannot complete file transfer: {e}"),
                }
            }
            "upload" => {
                let Some(name) = args.first() else {
                    println!("Usage: upload <filename>");
                    continue;
                };
                match upload(&sftp, &remote_dir, name).await {
                    Ok(bytes) => println!("transferred {}", format_size(bytes, DECIMAL)),
                    Err(e) => println!("Error: cannot complete file transfer: {e}"),
                }
            }
            "help" => show_help(),
            "exit" => return,
            _ => println!("unknown command"),
        }
    }
}

async fn download(
    sftp: &SftpSession,
    remote_dir: &str,
    name: &str,
) -> Result<u64, Box<dyn std::error::Error>> {
    let mut remote = sftp.open(remote_path(remote_dir, name)).await?;
    let mut local = tokio::fs::File::create(name).await?;
    let bytes = tokio::io::copy(&mut remote, &mut local).await?;
    Ok(bytes)
}

async fn upload(
    sftp: &SftpSession,
    remote_dir: &str,
    name: &str,
) -> Result<u64, Box<dyn std::error::Error>> {
    let mut local = tokio::fs::File::open(name).await?;
    let mut remote = sftp.create(remote_path(remote_dir, name)).await?;
    let bytes = tokio::io::copy(&mut local, &mut remote).await?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::remote_path;

    #[test]
    fn remote_paths_join() {
        assert_eq!(remote_path("/home/user", "file.txt"), "/home/user/file.txt");
        assert_eq!(remote_path("/", "file.txt"), "/file.txt");
        assert_eq!(remote_path("/home/user", "/etc/hosts"), "/etc/hosts");
    }
}
