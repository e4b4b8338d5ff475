use std::fs;

// 授权与记账记录的归属标签。
const LOCATION: &str = "Imus Branch";
const MACHINE_NAME: &str = "Carwash Bay 1";

/// 机器身份：每次启动从稳定的硬件标识重新推导，从不落盘。
#[derive(Clone, Debug)]
pub struct MachineIdentity {
    pub owner_id: String,
    pub machine_id: String,
    pub location: String,
    pub machine_name: String,
}

impl MachineIdentity {
    /// 推导顺序：树莓派 CPU 序列号 → /etc/machine-id → 随机 UUID。
    /// 前两者保证同一台硬件每次得到相同的标识。
    pub fn derive() -> Self {
        let owner_id = cpu_serial()
            .or_else(machine_id_file)
            .unwrap_or_else(|| {
                log::warn!("No stable hardware id found, falling back to random UUID");
                uuid::Uuid::new_v4().simple().to_string()
            });
        Self::from_owner_id(owner_id)
    }

    fn from_owner_id(owner_id: String) -> Self {
        let machine_id = format!("machine_{}", short_suffix(&owner_id));
        Self {
            owner_id,
            machine_id,
            location: LOCATION.to_string(),
            machine_name: MACHINE_NAME.to_string(),
        }
    }
}

/// 树莓派的 CPU 序列号（/proc/cpuinfo 的 Serial 行），全零视为无效。
fn cpu_serial() -> Option<String> {
    let cpuinfo = fs::read_to_string("/proc/cpuinfo").ok()?;
    for line in cpuinfo.lines() {
        if let Some(rest) = line.strip_prefix("Serial") {
            let serial = rest.trim_start_matches([' ', '\t', ':']).trim();
            if !serial.is_empty() && serial.chars().any(|c| c != '0') {
                return Some(serial.to_string());
            }
        }
    }
    None
}

fn machine_id_file() -> Option<String> {
    let id = fs::read_to_string("/etc/machine-id").ok()?;
    let id = id.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// 取标识的末 6 位作为机器编号后缀。
fn short_suffix(owner_id: &str) -> &str {
    let len = owner_id.len();
    &owner_id[len.saturating_sub(6)..]
}
