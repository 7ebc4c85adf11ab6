#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    use solo_switch::board::{BoardGpio, EspSystem};
    use solo_switch::clock::SystemClock;
    use solo_switch::controller::DeviceController;
    use solo_switch::mqtt_link::EspMqttLink;
    use solo_switch::nvs_store::NvsConfigKvs;
    use solo_switch::wifi_portal::EspPortal;

    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("Starting MQTT power switch firmware");

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let portal = EspPortal::new(peripherals.modem, sys_loop, nvs.clone())?;

    let mut controller = DeviceController::new(
        NvsConfigKvs::new(nvs),
        portal,
        EspMqttLink::new(),
        BoardGpio::new(),
        SystemClock::new(),
        EspSystem,
    );

    controller.boot()?;
    controller.run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("this firmware targets ESP-IDF; build with the espidf toolchain");
}
