use crate::scheduler::{Control, StopSignal};
use crate::types::{ConfigError, SourceList};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Turns process signals into scheduler events.
///
/// SIGHUP calls `reload` and sends the new source list; a failed reload is logged
/// and the scheduler keeps its current list. SIGINT and SIGTERM send a stop.
/// The task ends once the scheduler drops its receiver.
#[cfg(unix)]
pub fn spawn_signal_listener<F>(
    reload: F,
    control: mpsc::Sender<Control>,
) -> std::io::Result<JoinHandle<()>>
where
    F: Fn() -> Result<SourceList, ConfigError> + Send + 'static,
{
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = hangup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    match reload_event(&reload) {
                        Some(event) => event,
                        None => continue,
                    }
                }
                _ = interrupt.recv() => {
                    info!("Received SIGINT");
                    Control::Stop(StopSignal::Interrupt)
                }
                _ = terminate.recv() => {
                    info!("Received SIGTERM");
                    Control::Stop(StopSignal::Terminate)
                }
            };

            if control.send(event).await.is_err() {
                debug!("Scheduler is gone, signal listener exiting");
                break;
            }
        }
    }))
}

/// Without Unix signals only Ctrl-C is available, as a stop request.
#[cfg(not(unix))]
pub fn spawn_signal_listener<F>(
    _reload: F,
    control: mpsc::Sender<Control>,
) -> std::io::Result<JoinHandle<()>>
where
    F: Fn() -> Result<SourceList, ConfigError> + Send + 'static,
{
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            if control.send(Control::Stop(StopSignal::Interrupt)).await.is_err() {
                break;
            }
        }
    }))
}

/// Runs `reload`, mapping success to a reload event. Failures are logged.
pub fn reload_event<F>(reload: &F) -> Option<Control>
where
    F: Fn() -> Result<SourceList, ConfigError>,
{
    match reload() {
        Ok(sources) => Some(Control::Reload(sources)),
        Err(e) => {
            error!("Keeping previous configuration: {}", e);
            None
        }
    }
}
