use crate::error::{Result, WatchError};
use crate::events::{KeyState, VirtualKeyEvent};
use crate::trace_if_enabled;
use parking_lot::Mutex;
use tracing::info;

const EV_SYN: i32 = 0;
const EV_KEY: i32 = 1;

pub struct VirtualDevice {
    device: Mutex<uinput::Device>,
    device_name: String,
}

impl VirtualDevice {
    pub fn new(device_name: &str) -> Result<Self> {
        info!("Создание виртуального устройства uinput '{}' для инъекции клавиш", device_name);

        let device = uinput::default()?
            .name(device_name)?
            .event(uinput::event::Keyboard::All)?
            .create()
            .map_err(|e| WatchError::Uinput(format!("Не удалось создать виртуальное устройство '{}': {}", device_name, e)))?;

        info!("Виртуальное устройство '{}' создано успешно", device_name);
        Ok(Self {
            device: Mutex::new(device),
            device_name: device_name.to_string(),
        })
    }

    /// Отправить пачку событий клавиш, каждое с синхронизацией
    pub fn send_events(&self, events: &[VirtualKeyEvent]) -> Result<()> {
        let mut device = self.device.lock();

        for event in events {
            let keycode = i32::from(event.key_code.value());
            let value = match event.state {
                KeyState::Pressed => 1,
                KeyState::Released => 0,
            };

            device
                .write(EV_KEY, keycode, value)
                .map_err(|e| WatchError::Dispatch(format!("Не удалось отправить событие клавиши {}: {}", event.key_code, e)))?;

            device
                .write(EV_SYN, 0, 0)
                .map_err(|e| WatchError::Dispatch(format!("Не удалось синхронизировать события: {}", e)))?;

            trace_if_enabled!("Виртуальное событие {} {:?} отправлено", event.key_code, event.state);
        }

        Ok(())
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        info!("Закрытие виртуального устройства '{}'", self.device_name);
    }
}
