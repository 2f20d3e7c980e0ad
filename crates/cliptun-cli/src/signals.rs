//! SIGINT handling: first press starts a graceful close, second forces exit.

use cliptun_core::Channel;

/// Register the interrupt handler for a running channel.
pub fn install(channel: Channel) {
    tokio::spawn(async move {
        let mut close_requested = false;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if close_requested {
                std::process::exit(130);
            }
            close_requested = true;
            let channel = channel.clone();
            tokio::spawn(async move { channel.close().await });
        }
    });
}
