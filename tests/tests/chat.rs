use hotline_app::COMMANDS_HANDLED_KEY;
use hotline_kernel::{Datastore, ExitCode, OutboundMessage};
use hotline_runtime::{Host, ReloadEvent};
use hotline_testing::{TestHost, init_tracing, settle};
use std::time::Duration;

const CONFIG: &str = "prefix: \"!\"\nadmins: [alice]\nreload_ack: Swapped\n";
const WITHIN: Duration = Duration::from_secs(5);

fn contents(sent: &[OutboundMessage]) -> Vec<&str> {
    sent.iter().map(|m| m.content.as_str()).collect()
}

#[tokio::test]
async fn chat_module_reloads_on_admin_command() {
    init_tracing();
    let env = TestHost::with_module_config(CONFIG).unwrap();
    let host = Host::start(env.settings(), env.chat_parts()).await.unwrap();
    let trigger = host.trigger();
    let mut events = host.subscribe();
    let running = tokio::spawn(host.run());

    env.gateway.say("general", "carol", "!ping").await.unwrap();
    let sent = env.gateway.wait_for_sent(1, WITHIN).await;
    assert_eq!(contents(&sent), vec!["pong"]);

    // non-admins cannot reload
    env.gateway.say("general", "mallory", "!reload").await.unwrap();
    let sent = env.gateway.wait_for_sent(2, WITHIN).await;
    assert_eq!(sent[1].content, "You are not allowed to do that.");

    let request = env.gateway.say("ops", "alice", "!reload").await.unwrap();
    match settle(&mut events, WITHIN).await.unwrap() {
        ReloadEvent::Completed(report) => {
            assert_eq!(report.previous_version.as_deref(), Some(report.version.as_str()));
            assert_eq!(report.detached, 1);
        }
        other => panic!("expected a completed reload, got {other:?}"),
    }
    let sent = env.gateway.wait_for_sent(4, WITHIN).await;
    assert!(contents(&sent).contains(&"Reloading..."));
    let ack = sent
        .iter()
        .find(|m| m.content.starts_with("Swapped: "))
        .unwrap();
    assert_eq!(ack.channel_id, "ops");
    assert_eq!(ack.reply_to, Some(format!("msg-{request}")));

    // the new instance answers
    env.gateway.say("general", "carol", "!ping").await.unwrap();
    let sent = env.gateway.wait_for_sent(5, WITHIN).await;
    assert_eq!(sent[4].content, "pong");

    let handled = env
        .datastore
        .get(COMMANDS_HANDLED_KEY)
        .await
        .unwrap()
        .and_then(|v| v.as_u64());
    assert!(handled.is_some_and(|n| n >= 3));

    env.gateway.say("general", "alice", "!shutdown").await.unwrap();
    assert_eq!(running.await.unwrap(), ExitCode::Success);
    assert!(trigger.is_closed());
}

#[tokio::test]
async fn broken_config_reload_is_reported_by_the_running_module() {
    init_tracing();
    let env = TestHost::with_module_config(CONFIG).unwrap();
    let host = Host::start(env.settings(), env.chat_parts()).await.unwrap();
    let dispatcher = host.dispatcher();
    let before = dispatcher.active_listeners();
    let mut events = host.subscribe();
    let running = tokio::spawn(host.run());

    env.rewrite_module_config("prefix: \"?\"\nbogus_key: true\n")
        .unwrap();
    env.gateway.say("ops", "alice", "!reload").await.unwrap();
    match settle(&mut events, WITHIN).await.unwrap() {
        ReloadEvent::Aborted { .. } => {}
        other => panic!("expected an aborted reload, got {other:?}"),
    }

    let sent = env.gateway.wait_for_sent(2, WITHIN).await;
    let failure = sent
        .iter()
        .find(|m| m.content.starts_with("Reload failed: "))
        .unwrap();
    assert!(failure.content.contains("config"));
    assert_eq!(failure.channel_id, "ops");
    assert_eq!(dispatcher.active_listeners(), before);

    // still the old prefix, still serving
    env.gateway.say("general", "carol", "!ping").await.unwrap();
    let sent = env.gateway.wait_for_sent(3, WITHIN).await;
    assert_eq!(sent[2].content, "pong");

    env.gateway.close();
    assert_eq!(running.await.unwrap(), ExitCode::Success);
}

#[tokio::test]
async fn unreachable_datastore_fails_first_boot() {
    let env = TestHost::with_module_config(CONFIG).unwrap();
    env.datastore.set_available(false);

    let failure = Host::start(env.settings(), env.chat_parts())
        .await
        .err()
        .unwrap();
    assert_eq!(failure.code, ExitCode::DatastoreSetup);
}

#[tokio::test]
async fn malformed_chat_config_fails_first_boot() {
    let env = TestHost::with_module_config("admins: not-a-list\n").unwrap();

    let failure = Host::start(env.settings(), env.chat_parts())
        .await
        .err()
        .unwrap();
    assert_eq!(failure.code, ExitCode::ConfigInvalid);
}
