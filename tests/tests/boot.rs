use hotline_kernel::{BootStage, ExitCode};
use hotline_runtime::{DispatcherState, Host, LaunchArgs};
use hotline_testing::{Hook, Script, TestHost};

#[tokio::test]
async fn fresh_boot_runs_all_stages_in_order() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0").with_listeners(2));

    let host = env.boot().await.unwrap();
    assert_eq!(
        host.completed_stages(),
        &[
            BootStage::Args,
            BootStage::Config,
            BootStage::PreInit,
            BootStage::Init,
            BootStage::PostInit,
        ]
    );
    assert_eq!(
        env.journal.hooks_of("1.0.0"),
        vec![
            Hook::CreateConfigs,
            Hook::PreInit,
            Hook::Init,
            Hook::PostInit {
                origin: None,
                previous_version: None,
            },
        ]
    );

    let dispatcher = host.dispatcher();
    assert_eq!(dispatcher.state(), DispatcherState::NoStaging);
    assert_eq!(dispatcher.active_len(), 2);

    let live = host.sequencer().live_module().await.unwrap();
    assert_eq!(live.metadata.version, "1.0.0");
    assert_eq!(live.listeners.len(), 2);

    env.gateway.close();
    assert_eq!(host.run().await, ExitCode::Success);
    assert!(env.journal.hooks_of("1.0.0").contains(&Hook::Shutdown));
    assert_eq!(env.journal.detached().len(), 2);
}

#[tokio::test]
async fn config_failure_exits_with_config_invalid() {
    let env = TestHost::new().unwrap();
    env.loader
        .push(Script::failing("1.0.0", BootStage::Config, ExitCode::ConfigInvalid));

    let failure = env.boot().await.err().unwrap();
    assert_eq!(failure.stage, BootStage::Config);
    assert_eq!(failure.code, ExitCode::ConfigInvalid);
    assert_eq!(
        env.journal.hooks_of("1.0.0"),
        vec![Hook::CreateConfigs, Hook::Shutdown]
    );
}

#[tokio::test]
async fn refused_gateway_exits_with_connection_setup() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0"));
    env.gateway.refuse_connections(true);

    let failure = env.boot().await.err().unwrap();
    assert_eq!(failure.code, ExitCode::ConnectionSetup);
    assert!(!env.journal.hooks_of("1.0.0").contains(&Hook::Init));
}

#[tokio::test]
async fn init_failure_detaches_what_was_registered() {
    let env = TestHost::new().unwrap();
    env.loader.push(
        Script::failing("1.0.0", BootStage::Init, ExitCode::DatastoreSetup).with_listeners(3),
    );

    let failure = env.boot().await.err().unwrap();
    assert_eq!(failure.stage, BootStage::Init);
    assert_eq!(failure.code, ExitCode::DatastoreSetup);
    assert_eq!(env.journal.detached().len(), 3);
}

#[tokio::test]
async fn first_boot_post_init_failure_is_fatal() {
    let env = TestHost::new().unwrap();
    env.loader
        .push(Script::failing("1.0.0", BootStage::PostInit, ExitCode::Failure));

    let failure = env.boot().await.err().unwrap();
    assert_eq!(failure.stage, BootStage::PostInit);
    assert_eq!(failure.code, ExitCode::Failure);
    assert!(env.journal.hooks_of("1.0.0").contains(&Hook::Shutdown));
    assert_eq!(env.journal.detached().len(), 1);
}

#[tokio::test]
async fn unloadable_module_fails_first_boot() {
    let env = TestHost::new().unwrap();
    env.loader.push_failure("artifact is corrupt");

    let failure = env.boot().await.err().unwrap();
    assert_eq!(failure.stage, BootStage::Config);
    assert_eq!(failure.code, ExitCode::Failure);
    assert!(env.journal.hooks().is_empty());
}

#[tokio::test]
async fn invalid_settings_stop_at_args() {
    let env = TestHost::new().unwrap();
    env.loader.push(Script::healthy("1.0.0"));
    let mut settings = env.settings();
    settings.gateway.shards = 0;

    let failure = env.boot_with(settings).await.err().unwrap();
    assert_eq!(failure.stage, BootStage::Args);
    assert_eq!(failure.code, ExitCode::ConfigInvalid);
    assert_eq!(env.loader.loads(), 0);
}

#[tokio::test]
async fn missing_settings_file_fails_before_assembly() {
    let args = LaunchArgs {
        config: Some("/no/such/hotline.yaml".into()),
        ..LaunchArgs::default()
    };
    let failure = Host::boot(&args, |_settings| unreachable!("settings must not resolve"))
        .await
        .err()
        .unwrap();
    assert_eq!(failure.stage, BootStage::Args);
    assert_eq!(failure.code, ExitCode::ConfigInvalid);
}
