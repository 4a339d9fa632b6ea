#![cfg(unix)]

use std::process::Command;
use std::time::Duration;

use jobflow::worker::cancel_on_signal;
use tokio_util::sync::CancellationToken;

// Kept alone in this binary: the SIGTERM goes to the whole test process.
#[tokio::test]
async fn sigterm_cancels_the_shutdown_token() {
    let shutdown = CancellationToken::new();
    let child = shutdown.child_token();
    cancel_on_signal(shutdown.clone()).unwrap();

    let status = Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    tokio::time::timeout(Duration::from_secs(5), child.cancelled())
        .await
        .expect("SIGTERM should cancel the token");
    assert!(shutdown.is_cancelled());
}
