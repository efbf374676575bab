mod builder;
mod device;
mod http;
mod listener;
mod model;

pub use builder::ClientConfig;
pub use device::OpenEvse;
pub use listener::{ChannelUpdateListener, UpdateListener};
pub use model::{
    ChargeMode, Claim, DeviceInfo, FirmwareRelease, LimitType, Override, OverrideState,
    RapiResponse, SafetyCounts, charger_state_name,
};
