//! Translation of user hints into backend communicator configuration

use xccl_core::{CommConfig, CommOptions, Error, Result};

use tracing::{info, warn};

/// A tunable field of [`CommConfig`] that can be set from a hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    Blocking,
    CgaClusterSize,
    MinCtas,
    MaxCtas,
    NetName,
    SplitShare,
    TrafficClass,
    CommName,
    CollnetEnable,
    CtaPolicy,
    ShrinkShare,
    NvlsCtas,
    NChannelsPerNetPeer,
    NvlinkCentricSched,
}

impl ConfigField {
    pub const ALL: [ConfigField; 14] = [
        ConfigField::Blocking,
        ConfigField::CgaClusterSize,
        ConfigField::MinCtas,
        ConfigField::MaxCtas,
        ConfigField::NetName,
        ConfigField::SplitShare,
        ConfigField::TrafficClass,
        ConfigField::CommName,
        ConfigField::CollnetEnable,
        ConfigField::CtaPolicy,
        ConfigField::ShrinkShare,
        ConfigField::NvlsCtas,
        ConfigField::NChannelsPerNetPeer,
        ConfigField::NvlinkCentricSched,
    ];

    /// Name of the config field
    pub fn name(&self) -> &'static str {
        match self {
            ConfigField::Blocking => "blocking",
            ConfigField::CgaClusterSize => "cga_cluster_size",
            ConfigField::MinCtas => "min_ctas",
            ConfigField::MaxCtas => "max_ctas",
            ConfigField::NetName => "net_name",
            ConfigField::SplitShare => "split_share",
            ConfigField::TrafficClass => "traffic_class",
            ConfigField::CommName => "comm_name",
            ConfigField::CollnetEnable => "collnet_enable",
            ConfigField::CtaPolicy => "cta_policy",
            ConfigField::ShrinkShare => "shrink_share",
            ConfigField::NvlsCtas => "nvls_ctas",
            ConfigField::NChannelsPerNetPeer => "n_channels_per_net_peer",
            ConfigField::NvlinkCentricSched => "nvlink_centric_sched",
        }
    }

    /// Hint keys accepted for this field
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            ConfigField::Blocking => &["blocking"],
            ConfigField::CgaClusterSize => &["cgaClusterSize", "cga_cluster_size"],
            ConfigField::MinCtas => &["minCTAs", "min_ctas"],
            ConfigField::MaxCtas => &["maxCTAs", "max_ctas"],
            ConfigField::NetName => &["netName", "net_name"],
            ConfigField::SplitShare => &["splitShare", "split_share"],
            ConfigField::TrafficClass => &["trafficClass", "traffic_class"],
            ConfigField::CommName => &["commName", "comm_name"],
            ConfigField::CollnetEnable => &["collnetEnable", "collnet_enable"],
            ConfigField::CtaPolicy => &["CTAPolicy", "cta_policy"],
            ConfigField::ShrinkShare => &["shrinkShare", "shrink_share"],
            ConfigField::NvlsCtas => &["nvlsCTAs", "nvls_ctas"],
            ConfigField::NChannelsPerNetPeer => {
                &["nChannelsPerNetPeer", "n_channels_per_net_peer"]
            }
            ConfigField::NvlinkCentricSched => &["nvlinkCentricSched", "nvlink_centric_sched"],
        }
    }

    /// Look up the field a hint key refers to
    pub fn from_key(key: &str) -> Option<ConfigField> {
        Self::ALL
            .iter()
            .copied()
            .find(|field| field.keys().contains(&key))
    }

    /// Whether the field holds a string rather than an integer
    pub fn is_string(&self) -> bool {
        matches!(self, ConfigField::NetName | ConfigField::CommName)
    }

    /// Whether `config` already holds a value for this field
    pub fn is_set(&self, config: &CommConfig) -> bool {
        match self {
            ConfigField::Blocking => config.blocking.is_some(),
            ConfigField::CgaClusterSize => config.cga_cluster_size.is_some(),
            ConfigField::MinCtas => config.min_ctas.is_some(),
            ConfigField::MaxCtas => config.max_ctas.is_some(),
            ConfigField::NetName => config.net_name.is_some(),
            ConfigField::SplitShare => config.split_share.is_some(),
            ConfigField::TrafficClass => config.traffic_class.is_some(),
            ConfigField::CommName => config.comm_name.is_some(),
            ConfigField::CollnetEnable => config.collnet_enable.is_some(),
            ConfigField::CtaPolicy => config.cta_policy.is_some(),
            ConfigField::ShrinkShare => config.shrink_share.is_some(),
            ConfigField::NvlsCtas => config.nvls_ctas.is_some(),
            ConfigField::NChannelsPerNetPeer => config.n_channels_per_net_peer.is_some(),
            ConfigField::NvlinkCentricSched => config.nvlink_centric_sched.is_some(),
        }
    }

    /// Parse `value` and store it in `config`
    ///
    /// String values are copied into the config, which owns them from here on.
    pub fn apply(
        &self,
        config: &mut CommConfig,
        key: &str,
        value: &str,
        rank: u32,
        comm: &str,
    ) -> Result<()> {
        let int = || parse_int(key, value, rank, comm).map(Some);
        match self {
            ConfigField::Blocking => config.blocking = int()?,
            ConfigField::CgaClusterSize => config.cga_cluster_size = int()?,
            ConfigField::MinCtas => config.min_ctas = int()?,
            ConfigField::MaxCtas => config.max_ctas = int()?,
            ConfigField::NetName => config.net_name = Some(value.to_string()),
            ConfigField::SplitShare => config.split_share = int()?,
            ConfigField::TrafficClass => config.traffic_class = int()?,
            ConfigField::CommName => config.comm_name = Some(value.to_string()),
            ConfigField::CollnetEnable => config.collnet_enable = int()?,
            ConfigField::CtaPolicy => config.cta_policy = int()?,
            ConfigField::ShrinkShare => config.shrink_share = int()?,
            ConfigField::NvlsCtas => config.nvls_ctas = int()?,
            ConfigField::NChannelsPerNetPeer => config.n_channels_per_net_peer = int()?,
            ConfigField::NvlinkCentricSched => config.nvlink_centric_sched = int()?,
        }
        Ok(())
    }
}

fn parse_int(key: &str, value: &str, rank: u32, comm: &str) -> Result<i32> {
    value.trim().parse::<i32>().map_err(|e| Error::HintParse {
        key: key.to_string(),
        value: value.to_string(),
        rank,
        comm: comm.to_string(),
        reason: e.to_string(),
    })
}

/// Outcome of a hint translation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HintReport {
    /// Fields set from hints, in application order
    pub applied: Vec<ConfigField>,

    /// Hint keys that matched no field
    pub ignored: Vec<String>,
}

impl HintReport {
    /// Whether every hint was recognised
    pub fn is_clean(&self) -> bool {
        self.ignored.is_empty()
    }
}

/// Apply the hints in `options` to `config` for `rank`'s communicator `comm`
///
/// Keys are visited in sorted order, so when both spellings of a field are
/// present the result does not depend on map iteration order. Unknown keys
/// are logged and skipped. A malformed integer fails the whole pass.
pub fn apply_hints(
    config: &mut CommConfig,
    options: &CommOptions,
    rank: u32,
    comm: &str,
) -> Result<HintReport> {
    let mut keys: Vec<&String> = options.hints.keys().collect();
    keys.sort();

    let mut report = HintReport::default();
    for key in keys {
        let value = &options.hints[key];
        let Some(field) = ConfigField::from_key(key) else {
            warn!(key = %key, rank, comm = %comm, "Unknown XCCL hint, ignoring");
            report.ignored.push(key.clone());
            continue;
        };

        if report.applied.contains(&field) {
            warn!(
                key = %key,
                field = field.name(),
                comm = %comm,
                "Hint overrides a value set by another spelling"
            );
        }

        field.apply(config, key, value, rank, comm)?;
        info!(field = field.name(), value = %value, rank, comm = %comm, "Set XCCL hint");
        report.applied.push(field);
    }

    Ok(report)
}
