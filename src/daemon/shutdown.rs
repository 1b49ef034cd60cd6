use tokio::select;
use tokio_util::sync::CancellationToken;

/// Cancels the token on Ctrl-C. Returns as well when something else cancelled it first, for
/// example the host closing its pipe.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => (),
    };
}
