use super::ModuleKind;
use serde::Serialize;
use std::collections::BTreeMap;

/// A monitored subject. The identity tuple `(module, identifier)` is unique
/// across one report; collectors enforce it at discovery time.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "module", rename_all = "lowercase")]
pub enum Instance {
    Host(HostInstance),
    Mysql(MysqlInstance),
    Redis(RedisInstance),
    Nginx(NginxInstance),
    Tomcat(TomcatInstance),
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskMount {
    pub path: String,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostInstance {
    pub ident: String,
    pub hostname: String,
    pub ip: String,
    pub os: String,
    pub kernel: String,
    pub cpu_cores: u32,
    pub cpu_model: String,
    pub memory_total: u64,
    pub disk_mounts: Vec<DiskMount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MysqlClusterMode {
    Mgr,
    DualMaster,
    MasterSlave,
}

impl MysqlClusterMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "mgr" => Some(MysqlClusterMode::Mgr),
            "dual-master" | "dualmaster" | "dual_master" => Some(MysqlClusterMode::DualMaster),
            "master-slave" | "masterslave" | "master_slave" => Some(MysqlClusterMode::MasterSlave),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MysqlClusterMode::Mgr => "MGR",
            MysqlClusterMode::DualMaster => "dual-master",
            MysqlClusterMode::MasterSlave => "master-slave",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MysqlInstance {
    /// "ip:port"
    pub address: String,
    pub version: String,
    pub server_id: String,
    pub cluster_mode: Option<MysqlClusterMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RedisRole {
    Master,
    Slave,
    Unknown,
}

impl RedisRole {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "master" => RedisRole::Master,
            "slave" | "replica" => RedisRole::Slave,
            _ => RedisRole::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RedisRole::Master => "master",
            RedisRole::Slave => "slave",
            RedisRole::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedisInstance {
    /// "ip:port"
    pub address: String,
    pub ip: String,
    pub port: u16,
    pub version: String,
    pub role: RedisRole,
}

#[derive(Debug, Clone, Serialize)]
pub struct NginxInstance {
    /// "hostname:container" when containerized, otherwise "hostname:port".
    pub identifier: String,
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    pub container: Option<String>,
    pub app_type: String,
    pub version: String,
    pub install_path: String,
    pub error_log_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TomcatInstance {
    /// Same identity scheme as Nginx: "hostname:container" or "hostname:port".
    pub identifier: String,
    pub hostname: String,
    pub ip: String,
    pub port: u16,
    pub container: Option<String>,
    pub version: String,
    pub catalina_home: String,
}

pub fn container_identifier(hostname: &str, container: Option<&str>, port: u16) -> String {
    match container {
        Some(container) if !container.is_empty() => format!("{}:{}", hostname, container),
        _ => format!("{}:{}", hostname, port),
    }
}

impl Instance {
    pub fn module(&self) -> ModuleKind {
        match self {
            Instance::Host(_) => ModuleKind::Host,
            Instance::Mysql(_) => ModuleKind::Mysql,
            Instance::Redis(_) => ModuleKind::Redis,
            Instance::Nginx(_) => ModuleKind::Nginx,
            Instance::Tomcat(_) => ModuleKind::Tomcat,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Instance::Host(host) => &host.ident,
            Instance::Mysql(mysql) => &mysql.address,
            Instance::Redis(redis) => &redis.address,
            Instance::Nginx(nginx) => &nginx.identifier,
            Instance::Tomcat(tomcat) => &tomcat.identifier,
        }
    }

    pub fn hostname(&self) -> &str {
        match self {
            Instance::Host(host) => &host.hostname,
            Instance::Mysql(mysql) => &mysql.address,
            Instance::Redis(redis) => &redis.address,
            Instance::Nginx(nginx) => &nginx.hostname,
            Instance::Tomcat(tomcat) => &tomcat.hostname,
        }
    }

    pub fn ip(&self) -> &str {
        match self {
            Instance::Host(host) => &host.ip,
            Instance::Mysql(mysql) => mysql.address.split(':').next().unwrap_or(""),
            Instance::Redis(redis) => &redis.ip,
            Instance::Nginx(nginx) => &nginx.ip,
            Instance::Tomcat(tomcat) => &tomcat.ip,
        }
    }

    /// Module-specific descriptor picked up from discovery labels and shown
    /// next to the identity columns: replication role for Redis, cluster
    /// mode for MySQL. Pairs with `ModuleKind::detail_header`.
    pub fn detail(&self) -> Option<&'static str> {
        match self {
            Instance::Redis(redis) => Some(redis.role.as_str()),
            Instance::Mysql(mysql) => {
                Some(mysql.cluster_mode.map(|mode| mode.as_str()).unwrap_or("-"))
            }
            _ => None,
        }
    }

    /// Identity labels substituted into catalog query templates.
    pub fn query_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        match self {
            Instance::Host(host) => {
                labels.insert("ident".to_string(), host.ident.clone());
                labels.insert("hostname".to_string(), host.hostname.clone());
                labels.insert("ip".to_string(), host.ip.clone());
            }
            Instance::Mysql(mysql) => {
                labels.insert("address".to_string(), mysql.address.clone());
                labels.insert("instance".to_string(), mysql.address.clone());
            }
            Instance::Redis(redis) => {
                labels.insert("address".to_string(), redis.address.clone());
                labels.insert("instance".to_string(), redis.address.clone());
                labels.insert("ip".to_string(), redis.ip.clone());
                labels.insert("port".to_string(), redis.port.to_string());
            }
            Instance::Nginx(nginx) => {
                labels.insert("identifier".to_string(), nginx.identifier.clone());
                labels.insert("hostname".to_string(), nginx.hostname.clone());
                labels.insert("ip".to_string(), nginx.ip.clone());
                labels.insert("port".to_string(), nginx.port.to_string());
                labels.insert(
                    "container".to_string(),
                    nginx.container.clone().unwrap_or_default(),
                );
            }
            Instance::Tomcat(tomcat) => {
                labels.insert("identifier".to_string(), tomcat.identifier.clone());
                labels.insert("hostname".to_string(), tomcat.hostname.clone());
                labels.insert("ip".to_string(), tomcat.ip.clone());
                labels.insert("port".to_string(), tomcat.port.to_string());
                labels.insert(
                    "container".to_string(),
                    tomcat.container.clone().unwrap_or_default(),
                );
            }
        }
        return labels;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_container_identifier() {
        assert_eq!(container_identifier("web01", None, 80), "web01:80");
        assert_eq!(container_identifier("web01", Some(""), 80), "web01:80");
        assert_eq!(
            container_identifier("web01", Some("nginx-edge"), 80),
            "web01:nginx-edge"
        );
    }

    #[test]
    fn test_cluster_mode_parse() {
        assert_eq!(MysqlClusterMode::parse("MGR"), Some(MysqlClusterMode::Mgr));
        assert_eq!(
            MysqlClusterMode::parse("dual-master"),
            Some(MysqlClusterMode::DualMaster)
        );
        assert_eq!(
            MysqlClusterMode::parse("master_slave"),
            Some(MysqlClusterMode::MasterSlave)
        );
        assert_eq!(MysqlClusterMode::parse("galera"), None);
    }

    #[test]
    fn test_redis_role_parse() {
        assert_eq!(RedisRole::parse("master"), RedisRole::Master);
        assert_eq!(RedisRole::parse("replica"), RedisRole::Slave);
        assert_eq!(RedisRole::parse(""), RedisRole::Unknown);
    }

    #[test]
    fn test_instance_detail() {
        let redis = Instance::Redis(RedisInstance {
            address: "10.0.0.1:6379".to_string(),
            ip: "10.0.0.1".to_string(),
            port: 6379,
            version: "7.0.5".to_string(),
            role: RedisRole::Slave,
        });
        assert_eq!(redis.detail(), Some("slave"));

        let mysql = Instance::Mysql(MysqlInstance {
            address: "10.0.0.5:3306".to_string(),
            version: "8.0.32".to_string(),
            server_id: "5".to_string(),
            cluster_mode: Some(MysqlClusterMode::Mgr),
        });
        assert_eq!(mysql.detail(), Some("MGR"));

        let standalone = Instance::Mysql(MysqlInstance {
            address: "10.0.0.6:3306".to_string(),
            version: "8.0.32".to_string(),
            server_id: "6".to_string(),
            cluster_mode: None,
        });
        assert_eq!(standalone.detail(), Some("-"));

        let host = Instance::Host(HostInstance {
            ident: "web01".to_string(),
            hostname: "web01".to_string(),
            ip: "10.0.0.1".to_string(),
            os: String::new(),
            kernel: String::new(),
            cpu_cores: 1,
            cpu_model: String::new(),
            memory_total: 0,
            disk_mounts: Vec::new(),
        });
        assert_eq!(host.detail(), None);
    }

    #[test]
    fn test_mysql_query_labels() {
        let instance = Instance::Mysql(MysqlInstance {
            address: "10.0.0.5:3306".to_string(),
            version: "8.0.32".to_string(),
            server_id: "5".to_string(),
            cluster_mode: Some(MysqlClusterMode::Mgr),
        });
        let labels = instance.query_labels();
        assert_eq!(labels.get("instance").unwrap(), "10.0.0.5:3306");
        assert_eq!(instance.ip(), "10.0.0.5");
    }
}
