//! Application lifecycle observer for desktop shells.

use async_trait::async_trait;
use bridge_traits::{
    background::{LifecycleChangeStream, LifecycleObserver, LifecycleState},
    error::Result,
};
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle observer fed by the desktop shell.
///
/// Desktop apps are foreground by default. A shell that knows better
/// (window minimized, system sleeping) reports it through [`set_state`](Self::set_state).
pub struct DesktopLifecycleObserver {
    state: watch::Sender<LifecycleState>,
}

impl DesktopLifecycleObserver {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Foreground);
        Self { state }
    }

    /// Report a lifecycle transition. Repeated states are not re-broadcast.
    pub fn set_state(&self, state: LifecycleState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(?state, "Lifecycle state changed");
        }
    }
}

impl Default for DesktopLifecycleObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleObserver for DesktopLifecycleObserver {
    async fn get_state(&self) -> Result<LifecycleState> {
        Ok(*self.state.borrow())
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn LifecycleChangeStream>> {
        let rx = self.state.subscribe();
        Ok(Box::new(DesktopLifecycleChangeStream { rx }))
    }
}

/// Change stream returned by [`DesktopLifecycleObserver`].
pub struct DesktopLifecycleChangeStream {
    rx: watch::Receiver<LifecycleState>,
}

#[async_trait]
impl LifecycleChangeStream for DesktopLifecycleChangeStream {
    async fn next(&mut self) -> Option<LifecycleState> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
