use crate::anchor_utils::{test_config, MockChain};
use shutter_probe::chain::ChainGateway;
use shutter_probe::error::{ProbeError, RpcError};
use shutter_probe::runtime::{run_continuous, ProbeContext};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

fn temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("{prefix}_{nanos}"));
    std::fs::create_dir_all(&dir).expect("temp dir");
    dir
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submit_account_nonce_failure_aborts_setup() {
    let dir = temp_dir("setup_submit_nonce");
    let chain = MockChain::new(500);
    chain.fail_nonce_queries();
    let gateway: Arc<dyn ChainGateway> = chain.clone();

    let err = match ProbeContext::with_gateway(test_config(&dir), gateway).await {
        Ok(_) => panic!("setup must fail without a submit nonce"),
        Err(err) => err,
    };
    assert!(matches!(err, ProbeError::Net(RpcError::Transport(_))), "{err}");
    assert!(chain.sent().is_empty());
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_account_nonce_failure_stops_run_before_any_submission() {
    let dir = temp_dir("setup_pool_nonce");
    let chain = MockChain::new(500);
    let gateway: Arc<dyn ChainGateway> = chain.clone();
    let ctx = ProbeContext::with_gateway(test_config(&dir), gateway)
        .await
        .expect("setup with healthy chain");
    chain.fail_nonce_queries();

    assert!(ctx.prepare_accounts().await.is_err());

    let ended = tokio::time::timeout(
        Duration::from_secs(5),
        run_continuous(ctx, CancellationToken::new()),
    )
    .await
    .expect("run ends on its own");
    assert!(
        matches!(ended, Err(ProbeError::Net(RpcError::Transport(_)))),
        "{ended:?}"
    );
    assert!(chain.sent().is_empty(), "nothing broadcast without synced nonces");
    let _ = std::fs::remove_dir_all(dir);
}
