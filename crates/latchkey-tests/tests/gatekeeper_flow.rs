//! End-to-end tests for the Latchkey gatekeeper
//!
//! These drive the daemon components wired exactly as the binary wires
//! them: a session appears, the gate holds it, the user answers an OTP
//! challenge, and the session is released or terminated.

use std::sync::Arc;
use std::time::Duration;

use latchkey_core::{MasterConfig, SessionId, UserId, UserPolicy};
use latchkey_daemon::{
    DaemonConfig, DaemonError, FakeOtpTransport, FakeSessionProvider, GateNotification,
    GatekeeperService, IpcClient, IpcRequest, IpcResponse, IpcServer, MasterConfigStore,
    PolicyStore,
};
use tempfile::TempDir;
use tokio::time::sleep;

const MASTER_PW: &str = "master-pw";
const GOOD_CODE: &str = "123456";

struct Rig {
    service: Arc<GatekeeperService>,
    provider: Arc<FakeSessionProvider>,
    transport: Arc<FakeOtpTransport>,
    _temp_dir: TempDir,
}

/// Build the component stack with saved credentials and unlocked stores
async fn rig() -> Rig {
    let temp_dir = TempDir::new().unwrap();
    let provider = Arc::new(FakeSessionProvider::new());
    let transport = Arc::new(FakeOtpTransport::new(GOOD_CODE));

    let policies = Arc::new(PolicyStore::new(temp_dir.path().join("policies.enc")));
    policies.unlock(MASTER_PW).await.unwrap();
    let master = Arc::new(MasterConfigStore::new(temp_dir.path().join("master.enc")));
    master
        .save(
            MasterConfig::new(
                "https://otp.example.com".to_string(),
                "api-key".to_string(),
                MASTER_PW,
            ),
            MASTER_PW,
        )
        .await
        .unwrap();

    let service = Arc::new(GatekeeperService::new(
        DaemonConfig::default(),
        provider.clone(),
        policies,
        master,
        transport.clone(),
    ));

    Rig {
        service,
        provider,
        transport,
        _temp_dir: temp_dir,
    }
}

fn enabled_policy(user_id: &str) -> UserPolicy {
    UserPolicy::new(
        UserId::new(user_id),
        vec!["+15551234567".to_string()],
        60,
    )
}

/// The complete lifecycle of one gated login
#[tokio::test]
async fn full_gate_lifecycle() {
    // ==========================================
    // STEP 1: Configure and arm
    // ==========================================
    let rig = rig().await;
    let user = UserId::new("1000");
    rig.service
        .policies()
        .put(enabled_policy("1000"))
        .await
        .unwrap();

    let mut notifications = rig.service.subscribe();
    rig.service.start().await.unwrap();

    // ==========================================
    // STEP 2: A session appears and is held
    // ==========================================
    rig.provider.add_session("s1", "1000", "alice");
    rig.service.monitor().scan().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    assert_eq!(rig.provider.locked(), vec![SessionId::new("s1")]);
    assert!(rig.service.gate().pending_login(&user).await.is_some());
    assert!(matches!(
        notifications.recv().await,
        Ok(GateNotification::ChallengeRequired { .. })
    ));

    // ==========================================
    // STEP 3: Challenge, wrong code, right code
    // ==========================================
    rig.service.request_otp(&user).await.unwrap();
    let sent = rig.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, vec!["+15551234567".to_string()]);

    assert!(matches!(
        rig.service.verify_otp(&user, "000000").await,
        Err(DaemonError::VerificationFailed(_))
    ));

    rig.service.verify_otp(&user, GOOD_CODE).await.unwrap();
    assert_eq!(rig.provider.unlocked(), vec![SessionId::new("s1")]);
    let session = rig
        .service
        .monitor()
        .session(&SessionId::new("s1"))
        .await
        .unwrap();
    assert!(session.authenticated);
    assert!(matches!(
        notifications.recv().await,
        Ok(GateNotification::LoginAllowed { .. })
    ));

    // ==========================================
    // STEP 4: Re-login inside the skip window
    // ==========================================
    rig.provider.remove_session("s1");
    rig.service.monitor().scan().await.unwrap();
    sleep(Duration::from_millis(200)).await;
    assert!(matches!(
        notifications.recv().await,
        Ok(GateNotification::SessionEnded { .. })
    ));

    rig.provider.add_session("s2", "1000", "alice");
    rig.service.monitor().scan().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    // The fresh session authenticates without a lock or a challenge
    let session = rig
        .service
        .monitor()
        .session(&SessionId::new("s2"))
        .await
        .unwrap();
    assert!(session.authenticated);
    assert_eq!(rig.provider.locked(), vec![SessionId::new("s1")]);
    assert_eq!(rig.service.lifecycle().pending_count().await, 0);

    rig.service.stop().await.unwrap();
}

/// Exhausting the attempt budget terminates the held session
#[tokio::test]
async fn exhausted_attempts_log_the_session_off() {
    let rig = rig().await;
    let user = UserId::new("1000");
    rig.service
        .policies()
        .put(enabled_policy("1000"))
        .await
        .unwrap();
    rig.service.start().await.unwrap();

    rig.provider.add_session("s1", "1000", "alice");
    rig.service.monitor().scan().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    rig.service.request_otp(&user).await.unwrap();
    for _ in 0..2 {
        let _ = rig.service.verify_otp(&user, "000000").await;
    }
    assert!(matches!(
        rig.service.verify_otp(&user, "000000").await,
        Err(DaemonError::AttemptsExhausted)
    ));

    assert_eq!(rig.provider.logged_off(), vec![SessionId::new("s1")]);
    assert_eq!(rig.service.gate().pending_count().await, 0);
    // The withdrawn challenge cannot be answered late
    assert!(matches!(
        rig.service.verify_otp(&user, GOOD_CODE).await,
        Err(DaemonError::NoChallenge(_))
    ));

    rig.service.stop().await.unwrap();
}

/// Users without a policy, and disabled ones, are never held or texted
#[tokio::test]
async fn unmanaged_and_disabled_users_are_left_alone() {
    let rig = rig().await;
    let mut disabled = enabled_policy("1001");
    disabled.enabled = false;
    rig.service.policies().put(disabled).await.unwrap();
    rig.service.start().await.unwrap();

    rig.provider.add_session("s1", "1000", "alice");
    rig.provider.add_session("s2", "1001", "bob");
    rig.service.monitor().scan().await.unwrap();
    sleep(Duration::from_millis(200)).await;

    assert!(rig.provider.locked().is_empty());
    assert_eq!(rig.service.gate().pending_count().await, 0);
    assert!(rig.transport.sent().is_empty());

    assert!(matches!(
        rig.service.request_otp(&UserId::new("1000")).await,
        Err(DaemonError::PolicyNotFound(_))
    ));
    assert!(matches!(
        rig.service.request_otp(&UserId::new("1001")).await,
        Err(DaemonError::PolicyDisabled(_))
    ));

    rig.service.stop().await.unwrap();
}

/// A failed enumeration must not fabricate session-ended events
#[tokio::test]
async fn enumeration_failure_keeps_held_logins() {
    let rig = rig().await;
    let user = UserId::new("1000");
    rig.service
        .policies()
        .put(enabled_policy("1000"))
        .await
        .unwrap();

    rig.provider.add_session("s1", "1000", "alice");
    rig.service.monitor().scan().await.unwrap();
    let decision = rig
        .service
        .handle_login_attempt(&user, "alice")
        .await
        .unwrap();
    assert!(decision.requires_otp);

    rig.provider.set_fail_enumeration(true);
    assert!(rig.service.monitor().scan().await.is_err());

    // Unknown is not empty: the snapshot and the held login survive
    assert_eq!(rig.service.monitor().sessions().await.len(), 1);
    assert!(rig.service.gate().pending_login(&user).await.is_some());

    rig.provider.set_fail_enumeration(false);
    rig.service.monitor().scan().await.unwrap();
    assert_eq!(rig.service.monitor().sessions().await.len(), 1);
    assert!(rig.service.gate().pending_login(&user).await.is_some());
}

/// Console requests travel the real socket end to end
#[tokio::test]
async fn ipc_socket_round_trip() {
    let rig = rig().await;
    let socket_path = rig._temp_dir.path().join("latchkey.sock");

    let server = IpcServer::new(socket_path.clone(), rig.service.clone());
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    let client = IpcClient::new(socket_path);
    let mut alive = false;
    for _ in 0..50 {
        if client.ping().await {
            alive = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(alive, "daemon socket never came up");

    // Policy round trip over the wire
    let response = client
        .request(&IpcRequest::SaveUserPolicy {
            policy: enabled_policy("1000"),
        })
        .await
        .unwrap();
    assert!(matches!(response, IpcResponse::Policy { .. }));

    let response = client.request(&IpcRequest::ListUserPolicies).await.unwrap();
    match response {
        IpcResponse::Policies { policies } => {
            assert_eq!(policies.len(), 1);
            assert_eq!(policies[0].user_id.as_str(), "1000");
        }
        other => panic!("unexpected response: {:?}", other),
    }

    // Watch stream sees a challenge raised after it connected
    let mut stream = client.watch().await.unwrap();
    rig.provider.add_session("s1", "1000", "alice");
    rig.service.monitor().scan().await.unwrap();
    rig.service
        .handle_login_attempt(&UserId::new("1000"), "alice")
        .await
        .unwrap();

    match stream.next_event().await.unwrap() {
        GateNotification::ChallengeRequired { user_id, username } => {
            assert_eq!(user_id.as_str(), "1000");
            assert_eq!(username, "alice");
        }
        other => panic!("unexpected notification: {:?}", other),
    }
}
