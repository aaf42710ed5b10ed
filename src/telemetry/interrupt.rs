use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSignal {
    Interrupt,
    Terminate,
}

impl InterruptSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }

    /// Exit status of a process killed by this signal under the default
    /// disposition, as reported by shells.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Interrupt => 130,
            Self::Terminate => 143,
        }
    }
}

impl fmt::Display for InterruptSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type PendingSignal = Pin<Box<dyn Future<Output = Option<InterruptSignal>> + Send>>;

/// Installed interrupt listeners. Dropping the value releases them.
pub struct InterruptListener {
    next: Option<PendingSignal>,
}

impl InterruptListener {
    pub fn new(next: impl Future<Output = Option<InterruptSignal>> + Send + 'static) -> Self {
        Self {
            next: Some(Box::pin(next)),
        }
    }

    /// A listener that never fires.
    pub fn inert() -> Self {
        Self { next: None }
    }

    /// Resolves with the first delivered signal. Pending forever once the
    /// underlying source can no longer deliver.
    pub async fn recv(&mut self) -> InterruptSignal {
        let delivered = match self.next.as_mut() {
            Some(next) => next.await,
            None => None,
        };
        self.next = None;
        match delivered {
            Some(signal) => signal,
            None => std::future::pending().await,
        }
    }
}

impl fmt::Debug for InterruptListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptListener")
            .field("armed", &self.next.is_some())
            .finish()
    }
}

/// Source of external interrupts an instrumented operation races against.
pub trait InterruptSource: Send + Sync {
    fn name(&self) -> &str;

    /// Installs listeners for the lifetime of the returned value.
    fn listen(&self) -> io::Result<InterruptListener>;
}

/// Process signals: SIGINT and SIGTERM on unix, Ctrl-C elsewhere.
///
/// On unix the handlers are installed once per process and forward to the
/// listeners alive at delivery time. A signal that arrives while no listener
/// is installed terminates the process with the conventional `128 + signo`
/// status, as the default disposition would.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsInterrupts;

impl InterruptSource for OsInterrupts {
    fn name(&self) -> &str {
        "os"
    }

    #[cfg(unix)]
    fn listen(&self) -> io::Result<InterruptListener> {
        let receiver = os_dispatch::subscribe()?;
        Ok(InterruptListener::new(next_signal(receiver)))
    }

    #[cfg(not(unix))]
    fn listen(&self) -> io::Result<InterruptListener> {
        Ok(InterruptListener::new(async {
            tokio::signal::ctrl_c()
                .await
                .ok()
                .map(|()| InterruptSignal::Interrupt)
        }))
    }
}

#[cfg(unix)]
mod os_dispatch {
    use super::InterruptSignal;
    use std::io;
    use std::sync::{OnceLock, mpsc};
    use tokio::signal::unix::{SignalKind, signal};
    use tokio::sync::broadcast;
    use tracing::warn;

    static DISPATCHER: OnceLock<Result<broadcast::Sender<InterruptSignal>, String>> =
        OnceLock::new();

    pub(super) fn subscribe() -> io::Result<broadcast::Receiver<InterruptSignal>> {
        match DISPATCHER.get_or_init(start) {
            Ok(sender) => Ok(sender.subscribe()),
            Err(err) => Err(io::Error::other(err.clone())),
        }
    }

    /// Spawns the dispatcher thread and waits until its handlers are in place.
    fn start() -> Result<broadcast::Sender<InterruptSignal>, String> {
        let (sender, _) = broadcast::channel(8);
        let (ready_tx, ready_rx) = mpsc::channel();
        let forward = sender.clone();
        std::thread::Builder::new()
            .name("c3-signals".into())
            .spawn(move || run(&forward, &ready_tx))
            .map_err(|err| err.to_string())?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(sender),
            Ok(Err(err)) => Err(err),
            Err(_) => Err("signal dispatcher exited during startup".to_string()),
        }
    }

    // Runs on its own thread and runtime so it outlives any caller's runtime.
    fn run(
        sender: &broadcast::Sender<InterruptSignal>,
        ready: &mpsc::Sender<Result<(), String>>,
    ) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ready.send(Err(err.to_string()));
                return;
            }
        };

        runtime.block_on(async {
            let streams = signal(SignalKind::interrupt())
                .and_then(|interrupt| Ok((interrupt, signal(SignalKind::terminate())?)));
            let (mut interrupt, mut terminate) = match streams {
                Ok(streams) => streams,
                Err(err) => {
                    let _ = ready.send(Err(err.to_string()));
                    return;
                }
            };
            let _ = ready.send(Ok(()));

            loop {
                let received = tokio::select! {
                    Some(()) = interrupt.recv() => InterruptSignal::Interrupt,
                    Some(()) = terminate.recv() => InterruptSignal::Terminate,
                    else => return,
                };
                if sender.send(received).is_err() {
                    warn!(signal = %received, "no instrumented operation is listening, exiting");
                    std::process::exit(received.exit_code());
                }
            }
        });
    }
}

async fn next_signal(mut receiver: broadcast::Receiver<InterruptSignal>) -> Option<InterruptSignal> {
    loop {
        match receiver.recv().await {
            Ok(signal) => return Some(signal),
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Interrupts raised programmatically by the host application.
#[derive(Debug, Clone)]
pub struct ChannelInterrupts {
    sender: broadcast::Sender<InterruptSignal>,
}

impl ChannelInterrupts {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(8);
        Self { sender }
    }

    /// Delivers `signal` to every installed listener and returns how many
    /// there were.
    pub fn trigger(&self, signal: InterruptSignal) -> usize {
        self.sender.send(signal).unwrap_or(0)
    }

    pub fn active_listeners(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptSource for ChannelInterrupts {
    fn name(&self) -> &str {
        "channel"
    }

    fn listen(&self) -> io::Result<InterruptListener> {
        Ok(InterruptListener::new(next_signal(self.sender.subscribe())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn signal_names() {
        assert_eq!(InterruptSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(InterruptSignal::Terminate.as_str(), "SIGTERM");
        assert_eq!(InterruptSignal::Interrupt.exit_code(), 130);
        assert_eq!(InterruptSignal::Terminate.exit_code(), 143);
    }

    #[tokio::test]
    async fn trigger_reaches_installed_listener() {
        let interrupts = ChannelInterrupts::new();
        let mut listener = interrupts.listen().unwrap();
        assert_eq!(interrupts.active_listeners(), 1);

        assert_eq!(interrupts.trigger(InterruptSignal::Terminate), 1);
        assert_eq!(listener.recv().await, InterruptSignal::Terminate);
    }

    #[tokio::test]
    async fn dropping_listener_releases_it() {
        let interrupts = ChannelInterrupts::new();
        let listener = interrupts.listen().unwrap();
        assert_eq!(interrupts.active_listeners(), 1);
        drop(listener);
        assert_eq!(interrupts.active_listeners(), 0);
        assert_eq!(interrupts.trigger(InterruptSignal::Interrupt), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn inert_listener_never_fires() {
        let mut listener = InterruptListener::inert();
        let fired = tokio::time::timeout(Duration::from_secs(60), listener.recv()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn os_listener_installs_and_releases() {
        let listener = OsInterrupts.listen().unwrap();
        drop(listener);
    }
}
