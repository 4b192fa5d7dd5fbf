//! Admin session against a scripted text-protocol server.

mod support;

use gear_core::{Admin, FunctionStatus, GearError, VerboseLevel};
use support::ScriptedAdmin;

async fn admin_for(server: &ScriptedAdmin) -> Admin {
    let mut admin = Admin::new(&server.host(), server.port()).unwrap();
    admin.set_timeout(2_000);
    admin
}

#[tokio::test]
async fn test_status_and_workers() {
    let server = ScriptedAdmin::start(&[
        ("status", &["reverse\t3\t1\t2", "upper\t0\t0\t1", "."]),
        (
            "workers",
            &["30 127.0.0.1 worker-1 : reverse upper", "31 127.0.0.1 - :", "."],
        ),
    ])
    .await;
    let mut admin = admin_for(&server).await;

    let status = admin.status().await.unwrap();
    assert_eq!(status.len(), 2);
    assert_eq!(
        status[0],
        FunctionStatus {
            function: "reverse".into(),
            total: 3,
            running: 1,
            available_workers: 2,
        }
    );

    let workers = admin.workers().await.unwrap();
    assert_eq!(workers.len(), 2);
    assert_eq!(workers[0].client_id, "worker-1");
    assert_eq!(workers[0].functions, vec!["reverse", "upper"]);
    assert!(workers[1].functions.is_empty());

    // Both commands went over one connection.
    assert_eq!(server.received(), vec!["status", "workers"]);
}

#[tokio::test]
async fn test_empty_status() {
    let server = ScriptedAdmin::start(&[("status", &["."])]).await;
    let mut admin = admin_for(&server).await;
    assert!(admin.status().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_line_commands() {
    let server = ScriptedAdmin::start(&[
        ("version", &["OK 1.1.19"]),
        ("verbose", &["OK INFO"]),
        ("getpid", &["OK 4242"]),
        ("create function foo", &["OK"]),
        ("maxqueue foo 100", &["OK"]),
        ("drop function foo", &["OK"]),
        ("cancel job H:lap:1", &["OK"]),
    ])
    .await;
    let mut admin = admin_for(&server).await;

    assert_eq!(admin.version().await.unwrap(), "1.1.19");
    assert_eq!(admin.verbose().await.unwrap(), VerboseLevel::Info);
    assert_eq!(admin.getpid().await.unwrap(), 4242);
    admin.create_function("foo").await.unwrap();
    admin.maxqueue("foo", 100).await.unwrap();
    admin.drop_function("foo").await.unwrap();
    admin.cancel_job("H:lap:1").await.unwrap();
}

#[tokio::test]
async fn test_server_error_keeps_session_usable() {
    let server = ScriptedAdmin::start(&[("version", &["OK 1.1.19"])]).await;
    let mut admin = admin_for(&server).await;

    match admin.drop_function("missing").await {
        Err(GearError::ServerError { code, .. }) => assert_eq!(code, "UNKNOWN_COMMAND"),
        other => panic!("expected server error, got {other:?}"),
    }
    assert_eq!(admin.version().await.unwrap(), "1.1.19");
}

#[tokio::test]
async fn test_function_named_like_an_error() {
    let server = ScriptedAdmin::start(&[
        ("status", &["ERRORS_REPORT\t1\t0\t1", "reverse\t0\t0\t2", "."]),
        ("version", &["OK 1.1.19"]),
    ])
    .await;
    let mut admin = admin_for(&server).await;

    let status = admin.status().await.unwrap();
    assert_eq!(status.len(), 2);
    assert_eq!(status[0].function, "ERRORS_REPORT");
    assert_eq!(status[0].available_workers, 1);
    // The whole block was consumed, so the next reply lines up.
    assert_eq!(admin.version().await.unwrap(), "1.1.19");
}

#[tokio::test]
async fn test_show_jobs() {
    let server = ScriptedAdmin::start(&[
        ("show jobs", &["H:lap:1\t0\t0\t1", "H:lap:2\t2\t1\t0", "."]),
        ("show unique jobs", &["u-1", "u-2", "."]),
    ])
    .await;
    let mut admin = admin_for(&server).await;

    let jobs = admin.show_jobs().await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[1].retries, 2);
    assert!(jobs[1].ignore_job);
    assert_eq!(admin.show_unique_jobs().await.unwrap(), vec!["u-1", "u-2"]);
}

#[tokio::test]
async fn test_shutdown_graceful_then_reconnect() {
    let server = ScriptedAdmin::start(&[
        ("shutdown graceful", &["OK"]),
        ("shutdown", &["OK"]),
    ])
    .await;
    let mut admin = admin_for(&server).await;

    admin.shutdown(true).await.unwrap();
    admin.shutdown(false).await.unwrap();
    assert_eq!(server.received(), vec!["shutdown graceful", "shutdown"]);
}

#[tokio::test]
async fn test_timeout_without_reply() {
    let server = ScriptedAdmin::start(&[("status", &[])]).await;
    let mut admin = admin_for(&server).await;
    admin.set_timeout(150);
    assert!(matches!(admin.status().await, Err(GearError::Timeout(_))));
}

#[tokio::test]
async fn test_clone_targets_same_server() {
    let server = ScriptedAdmin::start(&[("version", &["OK 1.1.19"])]).await;
    let admin = admin_for(&server).await;
    let mut copy = admin.clone();
    assert_eq!(copy.info(), admin.info());
    assert_eq!(copy.version().await.unwrap(), "1.1.19");
}
