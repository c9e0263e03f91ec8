//! Integration tests for the container provisioner.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use tether_names::{ContainerType, MachineTag};
use tether_provisioner::{
    AgentConfig, ContainerProvisioner, Error, Provisioner, ProvisionerKind, Worker,
};
use tether_testing::{dummy_config, FakeBroker, FakeMachine, FakeState, FakeTaskFactory};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn start(
    container_type: ContainerType,
    agent: &str,
    state: &Arc<FakeState>,
    tasks: &Arc<FakeTaskFactory>,
) -> ContainerProvisioner {
    ContainerProvisioner::start(
        container_type,
        state.clone(),
        AgentConfig::new(agent),
        Arc::new(FakeBroker::new()),
        tasks.clone(),
    )
}

fn hosting(agent_machine: &str) -> Arc<FakeState> {
    let tag = MachineTag::from_id(agent_machine).unwrap();
    Arc::new(FakeState::new(dummy_config("prod", true)).with_machine(FakeMachine::new(tag)))
}

#[rstest]
#[case::lxc(ContainerType::Lxc)]
#[case::kvm(ContainerType::Kvm)]
#[case::lxd(ContainerType::Lxd)]
#[tokio::test]
async fn test_starts_task_for_hosted_containers(#[case] container_type: ContainerType) {
    let state = hosting("0");
    let tasks = Arc::new(FakeTaskFactory::new());
    let provisioner = start(container_type, "machine-0", &state, &tasks);

    let task = timeout(WAIT, tasks.wait_for_task(0)).await.unwrap().unwrap();
    assert_eq!(task.agent_tag(), "machine-0");
    assert!(!task.initial_safe_mode());
    assert!(!task.has_retry_watcher());
    assert_eq!(provisioner.kind(), ProvisionerKind::Container(container_type));
    assert_eq!(provisioner.container_type(), container_type);

    let machine = state.machine_fake(&MachineTag::from_id("0").unwrap()).unwrap();
    assert_eq!(machine.watched(), vec![container_type]);

    // Container provisioners never look at environment configuration.
    assert!(!state.calls().contains(&"environ_config"));
    assert!(!state.calls().contains(&"watch_machine_error_retry"));

    assert_eq!(provisioner.stop().await, Ok(()));
    assert!(task.is_stopped());
    assert!(machine.container_changes(container_type).is_stopped());
}

#[tokio::test]
async fn test_container_changes_reach_task() {
    let state = hosting("0");
    let tasks = Arc::new(FakeTaskFactory::new());
    let provisioner = start(ContainerType::Lxc, "machine-0", &state, &tasks);
    let task = timeout(WAIT, tasks.wait_for_task(0)).await.unwrap().unwrap();

    let machine = state.machine_fake(&MachineTag::from_id("0").unwrap()).unwrap();
    assert!(
        machine
            .container_changes(ContainerType::Lxc)
            .send(vec!["0/lxc/0".into()])
            .await
    );

    let batches = timeout(WAIT, task.wait_for_machine_batches(1)).await.unwrap();
    assert_eq!(batches, vec![vec!["0/lxc/0".to_string()]]);

    provisioner.stop().await.unwrap();
}

#[tokio::test]
async fn test_nested_container_agent_resolves_its_machine() {
    let state = hosting("0/lxd/1");
    let tasks = Arc::new(FakeTaskFactory::new());
    let provisioner = start(ContainerType::Kvm, "machine-0-lxd-1", &state, &tasks);

    timeout(WAIT, tasks.wait_for_task(0)).await.unwrap().unwrap();
    let machine = state
        .machine_fake(&MachineTag::from_id("0/lxd/1").unwrap())
        .unwrap();
    assert_eq!(machine.watched(), vec![ContainerType::Kvm]);

    provisioner.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_agent_machine_is_fatal() {
    let state = Arc::new(FakeState::new(dummy_config("prod", false)));
    let tasks = Arc::new(FakeTaskFactory::new());
    let provisioner = start(ContainerType::Lxd, "machine-0", &state, &tasks);

    let outcome = timeout(WAIT, provisioner.wait()).await.unwrap();
    assert_eq!(outcome, Err(Error::NotFound("machine 0".into())));
    assert_eq!(outcome.unwrap_err().to_string(), "machine 0 not found");
    assert_eq!(tasks.started_count(), 0);
}

#[tokio::test]
async fn test_container_watch_failure_is_fatal() {
    let state = hosting("0");
    let machine = state.machine_fake(&MachineTag::from_id("0").unwrap()).unwrap();
    machine.fail_container_watch(Some(Error::State("container watch refused".into())));
    let tasks = Arc::new(FakeTaskFactory::new());
    let provisioner = start(ContainerType::Lxd, "machine-0", &state, &tasks);

    let outcome = timeout(WAIT, provisioner.wait()).await.unwrap();
    assert_eq!(outcome, Err(Error::State("container watch refused".into())));
    assert_eq!(machine.watched(), vec![ContainerType::Lxd]);
    assert_eq!(tasks.started_count(), 0);
}

#[tokio::test]
async fn test_agent_tag_must_name_a_machine() {
    let state = hosting("0");
    let tasks = Arc::new(FakeTaskFactory::new());
    let provisioner = start(ContainerType::Lxc, "unit-wordpress-0", &state, &tasks);

    let outcome = timeout(WAIT, provisioner.wait()).await.unwrap();
    assert!(matches!(outcome, Err(Error::Tag(_))), "got {outcome:?}");
    assert_eq!(tasks.started_count(), 0);
    assert!(!state.calls().contains(&"machine"));
}

#[tokio::test]
async fn test_task_death_stops_provisioner() {
    let state = hosting("0");
    let tasks = Arc::new(FakeTaskFactory::new());
    let provisioner = start(ContainerType::Lxd, "machine-0", &state, &tasks);
    let task = timeout(WAIT, tasks.wait_for_task(0)).await.unwrap().unwrap();

    task.fail(Error::State("lxd daemon gone".into()));

    let expected = Error::State("lxd daemon gone".into()).annotate("provisioner task");
    assert_eq!(
        timeout(WAIT, provisioner.wait()).await.unwrap(),
        Err(expected.clone())
    );
    assert_eq!(provisioner.err(), Err(expected));
}

#[tokio::test]
async fn test_concurrent_kill_is_clean() {
    let state = hosting("0");
    let tasks = Arc::new(FakeTaskFactory::new());
    let provisioner = Arc::new(start(ContainerType::Lxc, "machine-0", &state, &tasks));
    let task = timeout(WAIT, tasks.wait_for_task(0)).await.unwrap().unwrap();
    assert_eq!(provisioner.err(), Err(Error::StillAlive));

    let mut killers = Vec::new();
    for _ in 0..8 {
        let provisioner = Arc::clone(&provisioner);
        killers.push(tokio::spawn(async move { provisioner.stop().await }));
    }
    for killer in killers {
        assert_eq!(timeout(WAIT, killer).await.unwrap().unwrap(), Ok(()));
    }
    assert!(task.is_stopped());
}
