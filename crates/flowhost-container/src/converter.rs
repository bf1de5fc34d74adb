//! Instance から Docker API パラメータへの変換

#![allow(deprecated)]

use crate::runtime::{ContainerSpec, N8N_PORT};
use bollard::container::{Config, CreateContainerOptions, NetworkingConfig};
use bollard::models::{EndpointSettings, HostConfig, RestartPolicy, RestartPolicyNameEnum};
use flowhost_core::Instance;
use flowhost_core::naming::volume_names;
use std::collections::{BTreeMap, HashMap};

/// 管理対象コンテナのラベル
pub const LABEL_MANAGED: &str = "flowhost.managed";
pub const LABEL_INSTANCE: &str = "flowhost.instance";
pub const LABEL_OWNER: &str = "flowhost.owner";
pub const LABEL_SUBDOMAIN: &str = "flowhost.subdomain";

/// インスタンスのコンテナ仕様を組み立てる
pub fn instance_spec(instance: &Instance, image: &str, network: &str) -> ContainerSpec {
    let (data_volume, files_volume) = volume_names(&instance.container_name);

    let env = vec![
        ("NODE_ENV", "production".to_string()),
        ("N8N_HOST", instance.url.clone()),
        ("N8N_PROTOCOL", "https".to_string()),
        ("WEBHOOK_URL", format!("https://{}", instance.url)),
        ("N8N_BASIC_AUTH_ACTIVE", "true".to_string()),
        ("N8N_BASIC_AUTH_USER", instance.basic_auth_user.clone()),
        ("N8N_BASIC_AUTH_PASSWORD", instance.basic_auth_password.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED.to_string(), "true".to_string());
    labels.insert(LABEL_INSTANCE.to_string(), instance.id.to_string());
    labels.insert(LABEL_OWNER.to_string(), instance.owner_id.to_string());
    labels.insert(LABEL_SUBDOMAIN.to_string(), instance.subdomain.clone());

    ContainerSpec {
        name: instance.container_name.clone(),
        image: image.to_string(),
        env,
        labels,
        // コア数 → nano CPU
        nano_cpus: (instance.cpu_cores * 1e9) as i64,
        memory_bytes: (instance.memory_mb * 1024 * 1024) as i64,
        volumes: vec![
            (data_volume, "/home/node/.n8n".to_string()),
            (files_volume, "/files".to_string()),
        ],
        network: network.to_string(),
        exposed_port: N8N_PORT,
    }
}

/// ContainerSpec を Docker のコンテナ設定に変換
pub fn to_container_config(spec: &ContainerSpec) -> (Config<String>, CreateContainerOptions<String>) {
    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(format!("{}/tcp", spec.exposed_port), HashMap::new());

    // 名前付きボリューム
    let binds: Vec<String> = spec
        .volumes
        .iter()
        .map(|(volume, mount)| format!("{}:{}", volume, mount))
        .collect();

    let host_config = Some(HostConfig {
        binds: Some(binds),
        nano_cpus: Some(spec.nano_cpus),
        memory: Some(spec.memory_bytes),
        network_mode: Some(spec.network.clone()),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::ALWAYS),
            maximum_retry_count: None,
        }),
        ..Default::default()
    });

    let labels: HashMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut endpoints = HashMap::new();
    endpoints.insert(spec.network.clone(), EndpointSettings::default());

    let config = Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        exposed_ports: Some(exposed_ports),
        host_config,
        labels: Some(labels),
        networking_config: Some(NetworkingConfig {
            endpoints_config: endpoints,
        }),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: spec.name.clone(),
        platform: None,
    };

    (config, options)
}

/// `image:tag` を分割。タグがなければ `latest`
pub fn parse_image_tag(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        // `host:5000/image` のポート部分はタグではない
        Some((name, tag)) if !tag.contains('/') => (name.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}
