//! Signal handlers for a recording session
//!
//! SIGINT and SIGTERM request a stop-and-save. SIGUSR1 and SIGUSR2 are
//! developer hooks that simulate the platform signals a desktop shell
//! does not emit: a phone call starting or ending, and the app moving
//! to or from the background.

use colored::Colorize;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

/// Session control signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// Stop the session and save (SIGINT/SIGTERM)
    Stop,
    /// Toggle a simulated phone call (SIGUSR1)
    ToggleCall,
    /// Toggle simulated backgrounding (SIGUSR2)
    ToggleBackground,
}

/// Session signal handler
///
/// Listens for OS signals and forwards them as [`SessionSignal`]s on a
/// channel the recording loop can select on.
pub struct SessionSignalHandler {
    receiver: mpsc::Receiver<SessionSignal>,
}

impl SessionSignalHandler {
    /// Create a new handler and start listening.
    pub async fn new() -> Result<Self, std::io::Error> {
        let (tx, rx) = mpsc::channel(10);

        // Setup SIGINT handler (stop and save)
        let tx_int = tx.clone();
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::spawn(async move {
            loop {
                sigint.recv().await;
                eprintln!("{} Received SIGINT (stopping)", "↓".cyan());
                let _ = tx_int.send(SessionSignal::Stop).await;
            }
        });

        // Setup SIGTERM handler (stop and save)
        let tx_term = tx.clone();
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            loop {
                sigterm.recv().await;
                eprintln!("{} Received SIGTERM (stopping)", "↓".cyan());
                let _ = tx_term.send(SessionSignal::Stop).await;
            }
        });

        // Setup SIGUSR1 handler (simulated call)
        let tx_usr1 = tx.clone();
        let mut sigusr1 = signal(SignalKind::user_defined1())?;
        tokio::spawn(async move {
            loop {
                sigusr1.recv().await;
                let _ = tx_usr1.send(SessionSignal::ToggleCall).await;
            }
        });

        // Setup SIGUSR2 handler (simulated backgrounding)
        let tx_usr2 = tx;
        let mut sigusr2 = signal(SignalKind::user_defined2())?;
        tokio::spawn(async move {
            loop {
                sigusr2.recv().await;
                let _ = tx_usr2.send(SessionSignal::ToggleBackground).await;
            }
        });

        Ok(Self { receiver: rx })
    }

    /// Wait for the next signal
    pub async fn recv(&mut self) -> Option<SessionSignal> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_signal_equality() {
        assert_eq!(SessionSignal::Stop, SessionSignal::Stop);
        assert_ne!(SessionSignal::ToggleCall, SessionSignal::ToggleBackground);
    }
}
