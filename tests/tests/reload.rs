use hotline_kernel::{
    BootStage, ChatMessage, EventEnvelope, ExitCode, GatewayEvent, ReloadFailure, ReloadOrigin,
};
use hotline_runtime::{BootSequencer, DispatcherState, ReloadEvent, ReloadTrigger};
use hotline_testing::{Hook, Script, TestHost, settle};
use std::sync::Arc;
use std::time::Duration;

fn envelope(sequence: u64) -> Arc<EventEnvelope> {
    let message = ChatMessage::new(format!("m{sequence}"), "general", "carol", "hello");
    Arc::new(EventEnvelope::new(
        sequence,
        0,
        GatewayEvent::MessageCreated(message),
    ))
}

fn operator() -> ReloadOrigin {
    ReloadOrigin::operator("test")
}

#[tokio::test]
async fn valid_reload_promotes_the_new_module() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0"));
    env.loader.push(Script::healthy("2.0.0").with_listeners(2));
    let host = env.boot().await.unwrap();
    let sequencer = host.sequencer();
    let dispatcher = host.dispatcher();
    let generation = dispatcher.active_generation();

    let report = sequencer.reload(operator()).await.unwrap();
    assert_eq!(report.version, "2.0.0");
    assert_eq!(report.previous_version.as_deref(), Some("1.0.0"));
    assert_eq!(report.detached, 1);
    assert_eq!(report.post_init, ExitCode::Success);
    assert!(report.sha256.is_none());
    assert!(report.generation > generation);

    assert_eq!(dispatcher.state(), DispatcherState::NoStaging);
    assert_eq!(dispatcher.active_len(), 2);
    assert_eq!(env.journal.detached(), vec!["1.0.0#0".to_string()]);
    assert_eq!(env.journal.hooks_of("1.0.0").last(), Some(&Hook::Shutdown));
    let hooks = env.journal.hooks_of("2.0.0");
    assert_eq!(hooks[..3], [Hook::CreateConfigs, Hook::PreInit, Hook::Init]);
    match &hooks[3] {
        Hook::PostInit {
            origin: Some(origin),
            previous_version,
        } => {
            assert_eq!(origin.requested_by, "test");
            assert_eq!(previous_version.as_deref(), Some("1.0.0"));
        }
        other => panic!("expected post_init with the reload origin, got {other:?}"),
    }

    let delivery = dispatcher.dispatch(envelope(7)).await;
    assert_eq!(delivery.delivered, 2);
    assert_eq!(env.journal.sequences_for("2.0.0"), vec![7, 7]);
    assert!(env.journal.sequences_for("1.0.0").is_empty());
}

async fn assert_failed_reload_keeps_live(script: Script, expected: ReloadFailure) {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0").with_listeners(2));
    env.loader.push(script);
    let host = env.boot().await.unwrap();
    let dispatcher = host.dispatcher();
    let before = dispatcher.active_listeners();
    let generation = dispatcher.active_generation();
    let mut events = host.subscribe();

    let failure = host.sequencer().reload(operator()).await.unwrap_err();
    assert_eq!(failure, expected);

    // staging was queued for this cycle and discarded again
    assert!(matches!(
        events.recv().await.unwrap(),
        ReloadEvent::Started { .. }
    ));
    let queued = match events.recv().await.unwrap() {
        ReloadEvent::StagingQueued { generation, .. } => generation,
        other => panic!("expected staging to be queued, got {other:?}"),
    };
    assert!(queued > generation);
    match events.recv().await.unwrap() {
        ReloadEvent::Aborted { failure, .. } => assert_eq!(failure, expected),
        other => panic!("expected an aborted reload, got {other:?}"),
    }
    assert_eq!(dispatcher.state(), DispatcherState::NoStaging);
    assert_eq!(dispatcher.staging_listeners(), None);
    assert_eq!(dispatcher.active_listeners(), before);
    assert_eq!(dispatcher.active_generation(), generation);
    assert_eq!(env.journal.aborted(), vec![expected.clone()]);
    assert!(!env.journal.hooks_of("1.0.0").contains(&Hook::Shutdown));
    assert!(env.journal.detached().iter().all(|name| !name.starts_with("1.0.0")));

    dispatcher.dispatch(envelope(1)).await;
    assert_eq!(env.journal.sequences_for("1.0.0"), vec![1, 1]);
    assert!(env.journal.sequences_for("2.0.0").is_empty());

    let live = host.sequencer().live_module().await.unwrap();
    assert_eq!(live.metadata.version, "1.0.0");

    // a follow-up reload can queue staging again
    env.loader.push(Script::healthy("3.0.0"));
    let report = host.sequencer().reload(operator()).await.unwrap();
    assert_eq!(report.version, "3.0.0");
    assert!(report.generation > queued);
}

#[tokio::test]
async fn invalid_config_leaves_the_live_module_untouched() {
    assert_failed_reload_keeps_live(
        Script::failing("2.0.0", BootStage::Config, ExitCode::ConfigInvalid),
        ReloadFailure::Stage {
            stage: BootStage::Config,
            code: ExitCode::ConfigInvalid,
        },
    )
    .await;
}

#[tokio::test]
async fn pre_init_failure_leaves_the_live_module_untouched() {
    assert_failed_reload_keeps_live(
        Script::failing("2.0.0", BootStage::PreInit, ExitCode::Failure),
        ReloadFailure::Stage {
            stage: BootStage::PreInit,
            code: ExitCode::Failure,
        },
    )
    .await;
}

#[tokio::test]
async fn init_failure_discards_staged_listeners() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0"));
    env.loader.push(
        Script::failing("2.0.0", BootStage::Init, ExitCode::DatastoreSetup).with_listeners(3),
    );
    let host = env.boot().await.unwrap();
    let mut events = host.subscribe();

    let failure = host.sequencer().reload(operator()).await.unwrap_err();
    assert_eq!(
        failure,
        ReloadFailure::Stage {
            stage: BootStage::Init,
            code: ExitCode::DatastoreSetup,
        }
    );
    let mut detached = env.journal.detached();
    detached.sort();
    assert_eq!(detached, vec!["2.0.0#0", "2.0.0#1", "2.0.0#2"]);
    assert_eq!(env.journal.hooks_of("2.0.0").last(), Some(&Hook::Shutdown));

    // the staging set was queued before init ran
    assert!(matches!(
        events.recv().await.unwrap(),
        ReloadEvent::Started { .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        ReloadEvent::StagingQueued { .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        ReloadEvent::Aborted { .. }
    ));
    assert_eq!(host.dispatcher().active_len(), 1);
}

#[tokio::test]
async fn load_failure_is_acknowledged() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0"));
    env.loader.push_failure("artifact is corrupt");
    let host = env.boot().await.unwrap();
    let mut events = host.subscribe();

    let failure = host.sequencer().reload(operator()).await.unwrap_err();
    match &failure {
        ReloadFailure::Load { reason } => assert!(reason.contains("artifact is corrupt")),
        other => panic!("unexpected failure {other:?}"),
    }
    assert_eq!(env.journal.aborted(), vec![failure]);

    // staging is queued before the load and discarded when it fails
    let queued = loop {
        if let ReloadEvent::StagingQueued { generation, .. } = events.recv().await.unwrap() {
            break generation;
        }
    };
    assert!(queued > 0);
    assert_eq!(host.dispatcher().state(), DispatcherState::NoStaging);
    assert_eq!(host.dispatcher().staging_listeners(), None);
    assert_eq!(host.dispatcher().active_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_init_times_out() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0"));
    env.loader.push(Script::healthy("2.0.0").with_init_delay(Duration::from_secs(600)));
    let mut settings = env.settings();
    settings.reload.timeout_secs = 5;
    let host = env.boot_with(settings).await.unwrap();

    let failure = host.sequencer().reload(operator()).await.unwrap_err();
    assert_eq!(
        failure,
        ReloadFailure::TimedOut {
            stage: BootStage::Init,
            after: Duration::from_secs(5),
        }
    );
    assert_eq!(env.journal.detached(), vec!["2.0.0#0".to_string()]);
    assert_eq!(host.dispatcher().state(), DispatcherState::NoStaging);
    assert_eq!(host.dispatcher().active_len(), 1);
}

#[tokio::test]
async fn second_reload_while_one_runs_is_busy() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0"));
    env.loader.push(Script::healthy("2.0.0").with_init_delay(Duration::from_millis(200)));
    let host = env.boot().await.unwrap();
    let sequencer = host.sequencer();
    let mut events = host.subscribe();

    let first = tokio::spawn({
        let sequencer = sequencer.clone();
        async move { sequencer.reload(operator()).await }
    });
    loop {
        if let ReloadEvent::StagingQueued { .. } = events.recv().await.unwrap() {
            break;
        }
    }
    assert!(sequencer.is_reloading());

    let busy = sequencer.reload(operator()).await.unwrap_err();
    assert_eq!(busy, ReloadFailure::Busy);

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.version, "2.0.0");
    assert_eq!(env.loader.loads(), 2);
    assert_eq!(env.journal.aborted(), vec![ReloadFailure::Busy]);
    assert!(!sequencer.is_reloading());
}

#[tokio::test]
async fn post_init_failure_after_reload_keeps_the_new_module() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0"));
    env.loader
        .push(Script::failing("2.0.0", BootStage::PostInit, ExitCode::Failure));
    let host = env.boot().await.unwrap();

    let report = host.sequencer().reload(operator()).await.unwrap();
    assert_eq!(report.post_init, ExitCode::Failure);
    let live = host.sequencer().live_module().await.unwrap();
    assert_eq!(live.metadata.version, "2.0.0");
    assert_eq!(host.dispatcher().active_len(), 1);
}

#[tokio::test]
async fn consecutive_reloads_retire_each_predecessor() {
    let env = TestHost::new().unwrap();
    for version in ["1.0.0", "1.1.0", "1.2.0"] {
        env.loader.push(Script::healthy(version));
    }
    let host = env.boot().await.unwrap();
    let sequencer = host.sequencer();

    let first = sequencer.reload(operator()).await.unwrap();
    let second = sequencer.reload(operator()).await.unwrap();
    assert!(second.generation > first.generation);
    assert_eq!(second.previous_version.as_deref(), Some("1.1.0"));
    assert_eq!(env.journal.detached(), vec!["1.0.0#0", "1.1.0#0"]);

    host.dispatcher().dispatch(envelope(3)).await;
    assert_eq!(env.journal.sequences_for("1.2.0"), vec![3]);
}

#[tokio::test]
async fn reload_before_first_boot_is_a_protocol_failure() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0"));
    let (trigger, _control) = ReloadTrigger::channel();
    let sequencer = BootSequencer::new(Arc::new(env.settings()), env.parts(), trigger.handle());

    let failure = sequencer.reload(operator()).await.unwrap_err();
    assert!(matches!(failure, ReloadFailure::Protocol { .. }));
    assert_eq!(env.loader.loads(), 0);
}

#[tokio::test]
async fn triggered_reload_runs_inside_the_host_loop() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0"));
    env.loader.push(Script::healthy("2.0.0"));
    let host = env.boot().await.unwrap();
    let trigger = host.trigger();
    let mut events = host.subscribe();
    let running = tokio::spawn(host.run());

    let within = Duration::from_secs(5);
    let before = env.gateway.say("general", "carol", "before").await.unwrap();
    assert!(env.journal.wait_for_deliveries(1, within).await);

    trigger.request_reload(operator()).unwrap();
    match settle(&mut events, within).await.unwrap() {
        ReloadEvent::Completed(report) => assert_eq!(report.version, "2.0.0"),
        other => panic!("expected a completed reload, got {other:?}"),
    }
    let after = env.gateway.say("general", "carol", "after").await.unwrap();
    assert!(env.journal.wait_for_deliveries(2, within).await);

    trigger.request_shutdown(ExitCode::Success).unwrap();
    assert_eq!(running.await.unwrap(), ExitCode::Success);

    assert_eq!(env.journal.sequences_for("1.0.0"), vec![before]);
    assert_eq!(env.journal.sequences_for("2.0.0"), vec![after]);
    assert!(trigger.is_closed());
}
