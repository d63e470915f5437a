use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::layout::Viewport;
use crate::manager::LoadingPriorityManager;

/// Forward scroll/resize updates to the manager.
///
/// The manager's throttle decides whether each update re-classifies right
/// away; a deferred pass is run by this task once it falls due, so the last
/// position of a scroll burst is never lost. Stops when the sender is dropped.
pub fn spawn_viewport_listener(
    manager: Arc<LoadingPriorityManager>,
    mut viewports: watch::Receiver<Viewport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let due = manager.reprioritization_due_in();

            tokio::select! {
                changed = viewports.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let viewport = *viewports.borrow_and_update();
                    manager.update_viewport(viewport);
                }
                _ = tokio::time::sleep(due.unwrap_or(Duration::ZERO)), if due.is_some() => {
                    manager.flush_reprioritization();
                }
            }
        }

        // apply anything still deferred before going away
        manager.flush_reprioritization();
        log::debug!("Viewport listener stopped");
    })
}
