/// 后端接口配置与路径常量。
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
}

pub const MACHINES_PATH: &str = "/api/v1/machines";
pub const LEDGER_PATH: &str = "/api/v1/machines/ledger";
/// 连通性探测地址（区分"没有网络"与"后端不可用"）。
pub const CONNECTIVITY_PROBE_URL: &str = "https://clients3.google.com/generate_204";

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

impl ApiConfig {
    /// 运行时通过 BACKEND_BASE_URL 覆盖，默认指向本机网关。
    pub fn from_env() -> Self {
        let base_url = std::env::var("BACKEND_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self { base_url }
    }

    pub fn machine_url(&self, machine_id: &str) -> String {
        format!("{}{}?machine_id={}", self.base_url, MACHINES_PATH, machine_id)
    }

    pub fn ledger_url(&self) -> String {
        format!("{}{}", self.base_url, LEDGER_PATH)
    }

    pub fn commands_url(&self, machine_id: &str) -> String {
        format!("{}{}/{}/commands", self.base_url, MACHINES_PATH, machine_id)
    }

    pub fn command_delete_url(&self, machine_id: &str, command_id: &str) -> String {
        format!(
            "{}{}/{}/commands/{}",
            self.base_url, MACHINES_PATH, machine_id, command_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_compose_from_base() {
        let api = ApiConfig {
            base_url: "http://backend:9000".to_string(),
        };
        assert_eq!(
            api.machine_url("machine_6b7c8d"),
            "http://backend:9000/api/v1/machines?machine_id=machine_6b7c8d"
        );
        assert_eq!(api.ledger_url(), "http://backend:9000/api/v1/machines/ledger");
        assert_eq!(
            api.command_delete_url("machine_6b7c8d", "cmd-1"),
            "http://backend:9000/api/v1/machines/machine_6b7c8d/commands/cmd-1"
        );
    }
}
