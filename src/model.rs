use serde::{Deserialize, Serialize};

/// 洗车车道（水洗 / 泡沫）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bay {
    Water,
    Foaming,
}

impl Bay {
    pub const ALL: [Bay; 2] = [Bay::Water, Bay::Foaming];

    /// 串口协议中的车道标识（继电器命令后缀）。
    pub fn lane_key(&self) -> &'static str {
        match self {
            Bay::Water => "L",
            Bay::Foaming => "R",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bay::Water => "water",
            Bay::Foaming => "foaming",
        }
    }
}

/// 串口链路状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
        }
    }
}

/// 运行参数（投币换算率与各超时）。
#[derive(Clone, Debug)]
pub struct KioskSettings {
    /// 水洗道每个币单位兑换的秒数。
    pub water_timer_secs: u32,
    /// 泡沫道每个币单位兑换的秒数。
    pub foaming_timer_secs: u32,
    /// 最小币值（比索），无法解析的投币额按此计。
    pub coin_unit: u32,
}

impl KioskSettings {
    pub fn per_coin_seconds(&self, bay: Bay) -> u32 {
        match bay {
            Bay::Water => self.water_timer_secs,
            Bay::Foaming => self.foaming_timer_secs,
        }
    }

    pub fn set_timer(&mut self, bay: Bay, secs: u32) {
        match bay {
            Bay::Water => self.water_timer_secs = secs,
            Bay::Foaming => self.foaming_timer_secs = secs,
        }
    }
}

impl Default for KioskSettings {
    fn default() -> Self {
        Self {
            water_timer_secs: 60,
            foaming_timer_secs: 60,
            coin_unit: 5,
        }
    }
}

/// 设置文件的持久化结构。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettingsFile {
    pub water_timer: u32,
    pub foaming_timer: u32,
}

impl SettingsFile {
    pub fn from_settings(settings: &KioskSettings) -> Self {
        Self {
            water_timer: settings.water_timer_secs,
            foaming_timer: settings.foaming_timer_secs,
        }
    }

    pub fn into_settings(self) -> KioskSettings {
        KioskSettings {
            water_timer_secs: self.water_timer,
            foaming_timer_secs: self.foaming_timer,
            ..KioskSettings::default()
        }
    }
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self::from_settings(&KioskSettings::default())
    }
}

/// 操作员面板动作（由展示层注入）。
#[derive(Clone, Copy, Debug)]
pub enum OperatorAction {
    /// 按下投币按钮，准备接收硬币。
    InsertCoin(Bay),
    /// 按下启动按钮。
    Start(Bay),
    /// 确认后的手动停止。
    Stop(Bay),
    /// 投币对话框关闭（超时或操作员取消）。
    DialogClosed(Bay),
    /// 修改车道计时设置（秒/币）。
    SetTimer { bay: Bay, secs: u32 },
}

/// 会话调度器的输入意图。跨线程生产者只投递意图，
/// 不直接修改车道状态。
#[derive(Clone, Debug)]
pub enum SessionIntent {
    /// 串口上报的投币事件（已按最小币值兜底）。
    Coin { amount: u32 },
    /// 串口链路状态变更。
    Link(LinkStatus),
    /// 操作员动作。
    Operator(OperatorAction),
    /// 远端授权裁定。
    Authorization(bool),
}

/// 单车道的只读快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BaySnapshot {
    pub remaining_secs: u32,
    pub credit: u32,
    pub running: bool,
    pub awaiting_coin: bool,
}

/// 整机只读快照，供展示层订阅渲染。
#[derive(Clone, Debug)]
pub struct KioskSnapshot {
    pub water: BaySnapshot,
    pub foaming: BaySnapshot,
    pub busy: bool,
    pub link: LinkStatus,
    pub authorized: bool,
}

impl KioskSnapshot {
    pub fn bay(&self, bay: Bay) -> &BaySnapshot {
        match bay {
            Bay::Water => &self.water,
            Bay::Foaming => &self.foaming,
        }
    }
}
