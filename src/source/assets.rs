use super::metrics::{request_error, truncate};
use super::{RetryPolicy, SourceError, SourceResult, remaining};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

/// Normalized host record. Identity fields come from the registry's direct
/// columns; the richer attributes come from the embedded metadata document.
#[derive(Debug, Clone, Default)]
pub struct HostMeta {
    pub ident: String,
    pub hostname: String,
    pub ip: String,
    pub os: String,
    pub kernel: String,
    pub cpu_cores: u32,
    pub cpu_model: String,
    pub memory_total: u64,
    pub tags: Vec<String>,
    pub filesystems: Vec<Filesystem>,
}

#[derive(Debug, Clone)]
pub struct Filesystem {
    pub name: String,
    pub mount: String,
    pub total_bytes: u64,
}

#[derive(Deserialize)]
struct TargetListResponse {
    #[serde(default)]
    dat: Option<TargetListDat>,
    #[serde(default)]
    err: String,
}

#[derive(Deserialize)]
struct TargetListDat {
    #[serde(default)]
    list: Vec<TargetData>,
    #[serde(default)]
    #[allow(unused)]
    total: i64,
}

#[derive(Deserialize)]
struct TargetResponse {
    #[serde(default)]
    dat: Option<TargetData>,
    #[serde(default)]
    err: String,
}

/// Raw registry row. `extend_info` is a stringified JSON document; it never
/// travels past this module.
#[derive(Deserialize)]
struct TargetData {
    ident: String,
    #[serde(default)]
    host_ip: String,
    #[serde(default)]
    os: String,
    #[serde(default)]
    cpu_num: u32,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    #[allow(unused)]
    remote_addr: String,
    #[serde(default)]
    extend_info: String,
}

#[derive(Deserialize, Default)]
struct ExtendInfo {
    #[serde(default)]
    cpu: ExtendCpu,
    #[serde(default)]
    memory: ExtendMemory,
    #[serde(default)]
    platform: ExtendPlatform,
    #[serde(default)]
    filesystems: Vec<ExtendFilesystem>,
}

#[derive(Deserialize, Default)]
struct ExtendCpu {
    #[serde(default)]
    cpu_cores: u32,
    #[serde(default)]
    model_name: String,
}

#[derive(Deserialize, Default)]
struct ExtendMemory {
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize, Default)]
struct ExtendPlatform {
    #[serde(default)]
    kernel_version: String,
    #[serde(default)]
    #[allow(unused)]
    os: String,
}

#[derive(Deserialize, Default)]
struct ExtendFilesystem {
    #[serde(default)]
    name: String,
    #[serde(default)]
    mount_point: String,
    #[serde(default)]
    total: u64,
}

const VIRTUAL_FS_NAMES: [&str; 4] = ["tmpfs", "overlay", "shm", "devtmpfs"];
const VIRTUAL_MOUNTS: [&str; 5] = ["/dev", "/dev/shm", "/run", "/sys", "/proc"];

/// Pseudo and container-lifecycle filesystems carry no capacity signal.
pub fn is_virtual_filesystem(name: &str, mount: &str) -> bool {
    if VIRTUAL_FS_NAMES.contains(&name) {
        return true;
    }
    if VIRTUAL_MOUNTS.contains(&mount) {
        return true;
    }
    if mount.contains("/run/containerd/") || mount.contains("/var/lib/kubelet/pods/") {
        return true;
    }
    return false;
}

/// Client for the asset registry's targets API.
pub struct AssetClient {
    endpoint: String,
    token: String,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
}

impl AssetClient {
    pub fn new(
        endpoint: &str,
        token: &str,
        client: reqwest::Client,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        return AssetClient {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
            timeout,
            retry,
        };
    }

    pub async fn list_hosts(
        &self,
        filter: Option<&str>,
        deadline: Instant,
    ) -> SourceResult<Vec<HostMeta>> {
        let url = format!("{}/api/targets", self.endpoint);
        let mut params = vec![("limit", "10000".to_string()), ("p", "1".to_string())];
        if let Some(filter) = filter {
            if !filter.is_empty() {
                params.push(("query", filter.to_string()));
            }
        }
        let body = self
            .retry
            .run(deadline, || self.fetch_once(&url, &params, deadline))
            .await?;
        let response: TargetListResponse = serde_json::from_str(&body)
            .map_err(|e| SourceError::Upstream(format!("malformed targets response: {}", e)))?;
        if !response.err.is_empty() {
            return Err(SourceError::Upstream(response.err));
        }
        let list = response.dat.map(|dat| dat.list).unwrap_or_default();
        return Ok(list.into_iter().map(normalize_target).collect());
    }

    pub async fn get_host(&self, ident: &str, deadline: Instant) -> SourceResult<HostMeta> {
        let url = format!("{}/api/target/{}", self.endpoint, ident);
        let body = self
            .retry
            .run(deadline, || self.fetch_once(&url, &[], deadline))
            .await?;
        let response: TargetResponse = serde_json::from_str(&body)
            .map_err(|e| SourceError::Upstream(format!("malformed target response: {}", e)))?;
        if !response.err.is_empty() {
            return Err(SourceError::Upstream(response.err));
        }
        let target = response
            .dat
            .ok_or_else(|| SourceError::Upstream(format!("target {} not found", ident)))?;
        return Ok(normalize_target(target));
    }

    async fn fetch_once(
        &self,
        url: &str,
        params: &[(&str, String)],
        deadline: Instant,
    ) -> SourceResult<String> {
        let Some(left) = remaining(deadline) else {
            return Err(SourceError::Timeout);
        };
        let response = self
            .client
            .get(url)
            .query(params)
            .header("X-User-Token", &self.token)
            .timeout(self.timeout.min(left))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        let text = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(SourceError::Rejected {
                status: status.as_u16(),
                detail: truncate(&text),
            });
        }
        return Ok(text);
    }
}

/// Direct fields win for identity; the embedded document only supplies what
/// the registry has no column for. A broken embedded document downgrades to
/// a warning, the host itself survives.
fn normalize_target(target: TargetData) -> HostMeta {
    let mut meta = HostMeta {
        ident: target.ident.clone(),
        hostname: target.ident,
        ip: target.host_ip,
        os: target.os,
        cpu_cores: target.cpu_num,
        tags: target.tags,
        ..Default::default()
    };
    if target.extend_info.is_empty() {
        return meta;
    }
    let extend: ExtendInfo = match serde_json::from_str(&target.extend_info) {
        Ok(extend) => extend,
        Err(err) => {
            log::warn!(
                "Skipping embedded metadata of host {}: {}",
                meta.ident,
                err
            );
            return meta;
        }
    };
    meta.kernel = extend.platform.kernel_version;
    meta.cpu_model = extend.cpu.model_name;
    meta.memory_total = extend.memory.total;
    if meta.cpu_cores == 0 {
        meta.cpu_cores = extend.cpu.cpu_cores;
    }
    meta.filesystems = extend
        .filesystems
        .into_iter()
        .filter(|fs| !is_virtual_filesystem(&fs.name, &fs.mount_point))
        .map(|fs| Filesystem {
            name: fs.name,
            mount: fs.mount_point,
            total_bytes: fs.total,
        })
        .collect();
    return meta;
}
