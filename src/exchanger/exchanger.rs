use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use super::types::*;
use crate::backend::types::{
    BackendClient, BackendContainer, ContainerRef, ContainerSpec, CpuLimits, DiskLimits,
    MemoryLimits, Properties,
};
use crate::config::types::ExecutorConfig;
use crate::tasks::types::{Container, PortMapping, Tags};

impl Exchanger {
    pub fn new(container_owner_name: &str, container_max_cpu_shares: u64, container_inode_limit: u64) -> Self {
        Exchanger {
            container_owner_name: container_owner_name.to_string(),
            container_max_cpu_shares,
            container_inode_limit,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            &config.container_owner_name,
            config.container_max_cpu_shares,
            config.container_inode_limit,
        )
    }

    /// Reads limits, ports and properties of `backend_container` into an executor container.
    ///
    /// Backend query failures are returned unchanged. Every property decodes
    /// independently of the others; the first failure in key order is returned.
    pub async fn to_executor(
        &self,
        backend_container: &dyn BackendContainer,
    ) -> Result<Container, ExchangeError> {
        let info = backend_container.info().await?;
        let memory_limits = backend_container.current_memory_limits().await?;
        let disk_limits = backend_container.current_disk_limits().await?;
        let cpu_limits = backend_container.current_cpu_limits().await?;

        let mut container = Container {
            container_handle: backend_container.handle(),
            memory_mb: memory_limits.limit_in_bytes / BYTES_PER_MB,
            disk_mb: disk_limits.byte_hard / BYTES_PER_MB,
            cpu_weight: self.cpu_weight_for(cpu_limits.limit_in_shares),
            ports: info
                .mapped_ports
                .iter()
                .map(|mapping| PortMapping {
                    host_port: mapping.host_port,
                    container_port: mapping.container_port,
                })
                .collect(),
            ..Default::default()
        };

        decode_properties(&info.properties, &mut container)?;
        Ok(container)
    }

    /// Creates the backend container for `container`, forwards its ports and applies its limits.
    ///
    /// Nothing is rolled back when a later call fails; the caller destroys the
    /// container on error.
    pub async fn to_backend(
        &self,
        client: &dyn BackendClient,
        container: &Container,
    ) -> Result<ContainerRef, ExchangeError> {
        let backend_container = self.create_backend(client, container).await?;
        self.configure_backend(backend_container.as_ref(), container)
            .await?;
        Ok(backend_container)
    }

    /// First half of `to_backend`: encodes the properties and creates the container.
    pub async fn create_backend(
        &self,
        client: &dyn BackendClient,
        container: &Container,
    ) -> Result<ContainerRef, ExchangeError> {
        let spec = ContainerSpec {
            handle: container.container_handle.clone(),
            root_fs_path: container.root_fs_path.clone(),
            properties: self.encode_properties(container)?,
        };

        let backend_container = client.create(spec).await?;
        debug!(guid = %container.guid, handle = %backend_container.handle(), "backend container created");
        Ok(backend_container)
    }

    /// Second half of `to_backend`: port forwards, then memory, disk and CPU limits.
    ///
    /// Memory is left unlimited when `memory_mb` is zero.
    pub async fn configure_backend(
        &self,
        backend_container: &dyn BackendContainer,
        container: &Container,
    ) -> Result<(), ExchangeError> {
        for port in &container.ports {
            backend_container
                .net_in(port.host_port, port.container_port)
                .await?;
        }

        if container.memory_mb != 0 {
            backend_container
                .limit_memory(MemoryLimits {
                    limit_in_bytes: container.memory_mb.saturating_mul(BYTES_PER_MB),
                })
                .await?;
        }

        backend_container
            .limit_disk(DiskLimits {
                byte_hard: container.disk_mb.saturating_mul(BYTES_PER_MB),
                inode_hard: self.container_inode_limit,
            })
            .await?;

        backend_container
            .limit_cpu(CpuLimits {
                limit_in_shares: self.cpu_shares_for(container.cpu_weight),
            })
            .await?;

        Ok(())
    }

    /// Property map stored with the backend container.
    ///
    /// Tags are written after the system keys, so a tag key equal to a system
    /// key would win. The distinct `tag:` prefix keeps that from happening.
    pub fn encode_properties(&self, container: &Container) -> Result<Properties, ExchangeError> {
        let actions = encode_json(CONTAINER_ACTIONS_PROPERTY, &container.actions)?;
        let env = encode_json(CONTAINER_ENV_PROPERTY, &container.env)?;
        let log = encode_json(CONTAINER_LOG_PROPERTY, &container.log)?;
        let result = encode_json(CONTAINER_RESULT_PROPERTY, &container.run_result)?;

        let mut properties: Properties = [
            (CONTAINER_OWNER_PROPERTY, self.container_owner_name.clone()),
            (CONTAINER_GUID_PROPERTY, container.guid.clone()),
            (CONTAINER_STATE_PROPERTY, container.state.as_str().to_string()),
            (CONTAINER_ALLOCATED_AT_PROPERTY, container.allocated_at.to_string()),
            (CONTAINER_ROOTFS_PROPERTY, container.root_fs_path.clone()),
            (CONTAINER_COMPLETE_URL_PROPERTY, container.complete_url.clone()),
            (CONTAINER_ACTIONS_PROPERTY, actions),
            (CONTAINER_ENV_PROPERTY, env),
            (CONTAINER_LOG_PROPERTY, log),
            (CONTAINER_RESULT_PROPERTY, result),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        for (name, value) in &container.tags {
            properties.insert(format!("{}{}", TAG_PROPERTY_PREFIX, name), value.clone());
        }

        Ok(properties)
    }

    pub async fn lookup(
        &self,
        client: &dyn BackendClient,
        handle: &str,
    ) -> Result<Container, ExchangeError> {
        let backend_container = client
            .lookup(handle)
            .await
            .map_err(|source| ExchangeError::Lookup {
                handle: handle.to_string(),
                source,
            })?;

        self.to_executor(backend_container.as_ref()).await
    }

    /// Every container owned by this executor carrying all of `tags`.
    pub async fn list(
        &self,
        client: &dyn BackendClient,
        tags: &Tags,
    ) -> Result<Vec<Container>, ExchangeError> {
        let mut filter = Properties::new();
        filter.insert(
            CONTAINER_OWNER_PROPERTY.to_string(),
            self.container_owner_name.clone(),
        );
        for (name, value) in tags {
            filter.insert(format!("{}{}", TAG_PROPERTY_PREFIX, name), value.clone());
        }

        let mut containers = Vec::new();
        for backend_container in client.containers(&filter).await? {
            containers.push(self.to_executor(backend_container.as_ref()).await?);
        }
        Ok(containers)
    }

    pub fn cpu_weight_for(&self, shares: u64) -> u32 {
        if self.container_max_cpu_shares == 0 {
            return 0;
        }
        (100.0 * shares as f64 / self.container_max_cpu_shares as f64).round() as u32
    }

    pub fn cpu_shares_for(&self, weight: u32) -> u64 {
        self.container_max_cpu_shares.saturating_mul(weight as u64) / 100
    }
}

pub(crate) fn decode_properties(
    properties: &Properties,
    container: &mut Container,
) -> Result<(), ExchangeError> {
    let mut first_error = None;

    for (key, value) in properties {
        if let Err(err) = decode_property(key, value, container) {
            warn!(property = %key, error = %err, "failed to decode container property");
            first_error.get_or_insert(err);
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn decode_property(key: &str, value: &str, container: &mut Container) -> Result<(), ExchangeError> {
    match key {
        CONTAINER_GUID_PROPERTY => container.guid = value.to_string(),
        CONTAINER_STATE_PROPERTY => {
            container.state = value.parse().map_err(|_| ExchangeError::InvalidState {
                state: value.to_string(),
            })?
        }
        CONTAINER_ALLOCATED_AT_PROPERTY => {
            container.allocated_at = value.parse().map_err(|_| ExchangeError::InvalidTimestamp {
                timestamp: value.to_string(),
            })?
        }
        CONTAINER_ROOTFS_PROPERTY => container.root_fs_path = value.to_string(),
        CONTAINER_COMPLETE_URL_PROPERTY => container.complete_url = value.to_string(),
        CONTAINER_ACTIONS_PROPERTY => container.actions = decode_json(key, value)?,
        CONTAINER_ENV_PROPERTY => container.env = decode_json(key, value)?,
        CONTAINER_LOG_PROPERTY => container.log = decode_json(key, value)?,
        CONTAINER_RESULT_PROPERTY => container.run_result = decode_json(key, value)?,
        _ => {
            if let Some(name) = key.strip_prefix(TAG_PROPERTY_PREFIX) {
                container.tags.insert(name.to_string(), value.to_string());
            }
        }
    }
    Ok(())
}

fn decode_json<T: DeserializeOwned>(property: &str, value: &str) -> Result<T, ExchangeError> {
    serde_json::from_str(value).map_err(|source| ExchangeError::InvalidJson {
        property: property.to_string(),
        value: value.to_string(),
        source,
    })
}

fn encode_json<T: Serialize>(property: &str, value: &T) -> Result<String, ExchangeError> {
    serde_json::to_string(value).map_err(|source| ExchangeError::Encode {
        property: property.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{BackendOp, InMemoryBackend};
    use crate::backend::types::BackendError;
    use crate::tasks::types::{
        Action, EnvironmentVariable, LogConfig, RunResult, State,
    };
    use pretty_assertions::assert_eq;

    fn exchanger() -> Exchanger {
        Exchanger::new("executor-under-test", 1024, 200_000)
    }

    fn sample_container() -> Container {
        let mut tags = Tags::new();
        tags.insert("app".to_string(), "web".to_string());
        tags.insert("space".to_string(), "dev".to_string());

        Container {
            guid: "task-guid".to_string(),
            container_handle: "handle-1".to_string(),
            state: State::Created,
            allocated_at: 1_700_000_000_123_456_789,
            root_fs_path: "docker:///busybox".to_string(),
            complete_url: "http://callback/complete".to_string(),
            actions: vec![Action::Run {
                path: "/bin/echo".to_string(),
                args: vec!["hi".to_string()],
                env: vec![],
                timeout_secs: Some(30),
            }],
            env: vec![EnvironmentVariable::new("FOO", "bar")],
            log: LogConfig {
                guid: "log-guid".to_string(),
                source_name: "APP".to_string(),
                index: Some(2),
            },
            run_result: RunResult {
                failed: false,
                failure_reason: String::new(),
                result: "42".to_string(),
            },
            tags,
            memory_mb: 256,
            disk_mb: 1024,
            cpu_weight: 50,
            ports: vec![
                PortMapping {
                    host_port: 8080,
                    container_port: 80,
                },
                PortMapping {
                    host_port: 2222,
                    container_port: 22,
                },
            ],
        }
    }

    async fn container_with_properties(
        backend: &InMemoryBackend,
        properties: Properties,
    ) -> ContainerRef {
        backend
            .create(ContainerSpec {
                handle: "h".to_string(),
                root_fs_path: String::new(),
                properties,
            })
            .await
            .unwrap()
    }

    fn properties(entries: &[(&str, &str)]) -> Properties {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let backend = InMemoryBackend::new();
        let exchanger = exchanger();
        let original = sample_container();

        let created = exchanger.to_backend(&backend, &original).await.unwrap();
        let decoded = exchanger.to_executor(created.as_ref()).await.unwrap();

        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_encode_properties_keys() {
        let exchanger = exchanger();
        let properties = exchanger.encode_properties(&sample_container()).unwrap();

        assert_eq!(properties["executor:owner"], "executor-under-test");
        assert_eq!(properties["executor:guid"], "task-guid");
        assert_eq!(properties["executor:state"], "created");
        assert_eq!(properties["executor:allocated-at"], "1700000000123456789");
        assert_eq!(properties["executor:rootfs"], "docker:///busybox");
        assert_eq!(properties["executor:complete-url"], "http://callback/complete");
        assert_eq!(properties["executor:env"], r#"[{"name":"FOO","value":"bar"}]"#);
        assert_eq!(properties["tag:app"], "web");
        assert_eq!(properties["tag:space"], "dev");
        assert_eq!(properties.len(), 12);
    }

    #[tokio::test]
    async fn test_invalid_state() {
        let backend = InMemoryBackend::new();
        let created = container_with_properties(
            &backend,
            properties(&[(CONTAINER_STATE_PROPERTY, "bogus")]),
        )
        .await;

        match exchanger().to_executor(created.as_ref()).await {
            Err(ExchangeError::InvalidState { state }) => assert_eq!(state, "bogus"),
            other => panic!("expected invalid state, got {:?}", other),
        }
    }

    #[test]
    fn test_all_state_literals_decode() {
        for (literal, state) in [
            ("reserved", State::Reserved),
            ("initializing", State::Initializing),
            ("created", State::Created),
            ("completed", State::Completed),
        ] {
            let mut container = Container::default();
            decode_properties(
                &properties(&[(CONTAINER_STATE_PROPERTY, literal)]),
                &mut container,
            )
            .unwrap();
            assert_eq!(container.state, state);
        }
    }

    #[test]
    fn test_allocated_at() {
        let mut container = Container::default();
        let err = decode_properties(
            &properties(&[(CONTAINER_ALLOCATED_AT_PROPERTY, "not-a-number")]),
            &mut container,
        )
        .unwrap_err();
        match err {
            ExchangeError::InvalidTimestamp { timestamp } => assert_eq!(timestamp, "not-a-number"),
            other => panic!("expected invalid timestamp, got {:?}", other),
        }

        decode_properties(
            &properties(&[(CONTAINER_ALLOCATED_AT_PROPERTY, "12345")]),
            &mut container,
        )
        .unwrap();
        assert_eq!(container.allocated_at, 12345);
    }

    #[test]
    fn test_invalid_json_does_not_stop_siblings() {
        let mut container = Container::default();
        let err = decode_properties(
            &properties(&[
                (CONTAINER_ACTIONS_PROPERTY, "{not json"),
                (CONTAINER_ENV_PROPERTY, r#"[{"name":"A","value":"b"}]"#),
            ]),
            &mut container,
        )
        .unwrap_err();

        match &err {
            ExchangeError::InvalidJson {
                property, value, ..
            } => {
                assert_eq!(property, "executor:actions");
                assert_eq!(value, "{not json");
            }
            other => panic!("expected invalid json, got {:?}", other),
        }
        assert!(err.to_string().contains("{not json"));
        assert_eq!(container.env, vec![EnvironmentVariable::new("A", "b")]);
    }

    #[tokio::test]
    async fn test_invalid_json_fails_whole_translation() {
        let backend = InMemoryBackend::new();
        let created = container_with_properties(
            &backend,
            properties(&[(CONTAINER_RESULT_PROPERTY, "[")]),
        )
        .await;

        let err = exchanger().to_executor(created.as_ref()).await.unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidJson { ref property, .. } if property == "executor:result"));
    }

    #[tokio::test]
    async fn test_tags_only() {
        let backend = InMemoryBackend::new();
        let created = container_with_properties(
            &backend,
            properties(&[("tag:foo", "bar"), ("tag:baz", "qux"), ("unrelated", "x")]),
        )
        .await;

        let decoded = exchanger().to_executor(created.as_ref()).await.unwrap();

        let mut tags = Tags::new();
        tags.insert("foo".to_string(), "bar".to_string());
        tags.insert("baz".to_string(), "qux".to_string());
        assert_eq!(
            decoded,
            Container {
                container_handle: "h".to_string(),
                tags,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_cpu_weight_conversion() {
        let exchanger = exchanger();
        assert_eq!(exchanger.cpu_shares_for(50), 512);
        assert_eq!(exchanger.cpu_weight_for(512), 50);
        assert_eq!(exchanger.cpu_shares_for(33), 337);
        assert_eq!(exchanger.cpu_weight_for(337), 33);
        assert_eq!(Exchanger::new("o", 0, 0).cpu_weight_for(512), 0);

        let backend = InMemoryBackend::new();
        let created = exchanger
            .to_backend(&backend, &Container {
                cpu_weight: 50,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(created.current_cpu_limits().await.unwrap().limit_in_shares, 512);
    }

    #[tokio::test]
    async fn test_limits_applied() {
        let backend = InMemoryBackend::new();
        let created = exchanger()
            .to_backend(&backend, &sample_container())
            .await
            .unwrap();

        assert_eq!(
            created.current_memory_limits().await.unwrap().limit_in_bytes,
            256 * 1024 * 1024
        );
        assert_eq!(
            created.current_disk_limits().await.unwrap(),
            DiskLimits {
                byte_hard: 1024 * 1024 * 1024,
                inode_hard: 200_000,
            }
        );
    }

    #[tokio::test]
    async fn test_zero_memory_is_not_limited() {
        let backend = InMemoryBackend::new();
        exchanger()
            .to_backend(&backend, &Container {
                memory_mb: 0,
                disk_mb: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        let calls = backend.calls().await;
        assert!(!calls.contains(&BackendOp::LimitMemory));
        assert!(calls.contains(&BackendOp::LimitDisk));
        assert!(calls.contains(&BackendOp::LimitCpu));
    }

    #[tokio::test]
    async fn test_net_in_failure_aborts_remaining_work() {
        let backend = InMemoryBackend::new();
        backend.fail(BackendOp::NetIn, "no ports left").await;

        let err = match exchanger().to_backend(&backend, &sample_container()).await {
            Err(err) => err,
            Ok(_) => panic!("expected net_in failure"),
        };

        assert!(matches!(
            err,
            ExchangeError::Backend(BackendError::Operation(ref message)) if message == "no ports left"
        ));
        assert_eq!(
            backend.calls().await,
            vec![BackendOp::Create, BackendOp::NetIn]
        );
        // no rollback: the container stays for the caller to destroy
        assert_eq!(backend.handles().await, vec!["handle-1".to_string()]);
    }

    #[tokio::test]
    async fn test_create_failure_passes_through() {
        let backend = InMemoryBackend::new();
        backend.fail(BackendOp::Create, "backend down").await;

        let err = exchanger()
            .to_backend(&backend, &sample_container())
            .await
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "backend down");
        assert!(backend.handles().await.is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_passes_through() {
        let backend = InMemoryBackend::new();
        let created = exchanger()
            .to_backend(&backend, &sample_container())
            .await
            .unwrap();
        backend.fail(BackendOp::CurrentDiskLimits, "disk query failed").await;

        let err = exchanger().to_executor(created.as_ref()).await.unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::Backend(BackendError::Operation(ref message)) if message == "disk query failed"
        ));
    }

    #[tokio::test]
    async fn test_partial_megabytes_truncate() {
        let backend = InMemoryBackend::new();
        let created = container_with_properties(&backend, Properties::new()).await;
        created
            .limit_memory(MemoryLimits {
                limit_in_bytes: 3 * BYTES_PER_MB + 1,
            })
            .await
            .unwrap();
        created
            .limit_disk(DiskLimits {
                byte_hard: 8 * BYTES_PER_MB - 1,
                inode_hard: 10,
            })
            .await
            .unwrap();

        let decoded = exchanger().to_executor(created.as_ref()).await.unwrap();
        assert_eq!(decoded.memory_mb, 3);
        assert_eq!(decoded.disk_mb, 7);
    }

    #[tokio::test]
    async fn test_round_trip_across_weights_and_sizes() {
        let exchanger = exchanger();
        for (index, (cpu_weight, memory_mb, disk_mb)) in
            [(0, 0, 0), (1, 1, 1), (33, 128, 512), (99, 4096, 10), (100, 64, 65536)]
                .into_iter()
                .enumerate()
        {
            let backend = InMemoryBackend::new();
            let original = Container {
                guid: format!("guid-{}", index),
                container_handle: format!("handle-{}", index),
                cpu_weight,
                memory_mb,
                disk_mb,
                ..Default::default()
            };

            let created = exchanger.to_backend(&backend, &original).await.unwrap();
            let decoded = exchanger.to_executor(created.as_ref()).await.unwrap();

            assert_eq!(decoded, original, "weight {}", cpu_weight);
        }
    }

    #[tokio::test]
    async fn test_create_backend_then_configure() {
        let backend = InMemoryBackend::new();
        let exchanger = exchanger();
        let container = sample_container();

        let created = exchanger.create_backend(&backend, &container).await.unwrap();
        assert_eq!(backend.calls().await, vec![BackendOp::Create]);

        exchanger
            .configure_backend(created.as_ref(), &container)
            .await
            .unwrap();
        assert_eq!(
            backend.calls().await,
            vec![
                BackendOp::Create,
                BackendOp::NetIn,
                BackendOp::NetIn,
                BackendOp::LimitMemory,
                BackendOp::LimitDisk,
                BackendOp::LimitCpu,
            ]
        );
    }

    #[tokio::test]
    async fn test_lookup() {
        let backend = InMemoryBackend::new();
        let exchanger = exchanger();
        exchanger
            .to_backend(&backend, &sample_container())
            .await
            .unwrap();

        let found = exchanger.lookup(&backend, "handle-1").await.unwrap();
        assert_eq!(found.guid, "task-guid");

        match exchanger.lookup(&backend, "missing").await {
            Err(ExchangeError::Lookup { handle, source }) => {
                assert_eq!(handle, "missing");
                assert_eq!(source, BackendError::NotFound("missing".to_string()));
            }
            other => panic!("expected lookup error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_only_owned_containers() {
        let backend = InMemoryBackend::new();
        let exchanger = exchanger();
        exchanger
            .to_backend(&backend, &sample_container())
            .await
            .unwrap();
        Exchanger::new("other-executor", 1024, 1)
            .to_backend(&backend, &Container {
                container_handle: "foreign".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let all = exchanger.list(&backend, &Tags::new()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].container_handle, "handle-1");

        let mut tags = Tags::new();
        tags.insert("app".to_string(), "worker".to_string());
        assert!(exchanger.list(&backend, &tags).await.unwrap().is_empty());
    }
}
