use candle_core::Device;
use tracing::info;

pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(dev) = Device::new_metal(0) {
            info!(device = "metal", "selected compute device");
            return dev;
        }
    }
    info!(device = "cpu", "selected compute device");
    Device::Cpu
}
