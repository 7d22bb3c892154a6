// Drives a scan controller against the in-memory radio: a live session watched through a
// discovery subscription, then a bounded scan that is cancelled half way.
//
// Run with `RUST_LOG=blescout=debug cargo run --example live_scan` to see the session log.

use blescout::api::{AdapterState, Advertisement, AdvertisementData, DeviceId, ScanEvent};
use blescout::mock::MockRadio;
use blescout::{CancellationToken, ScanConfig, ScanController};
use futures::stream::StreamExt;
use rand::Rng;
use std::time::Duration;
use tokio::time;
use uuid::Uuid;

fn spawn_advertisers(radio: MockRadio, devices: usize) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ids: Vec<_> = (0..devices)
            .map(|_| DeviceId::from_uuid(Uuid::new_v4()))
            .collect();
        loop {
            let (index, rssi) = {
                let mut rng = rand::rng();
                (rng.random_range(0..ids.len()), rng.random_range(-95..-35))
            };
            radio.advertise(Advertisement {
                id: ids[index],
                name: Some(format!("Sensor {}", index)),
                rssi,
                data: AdvertisementData::new(),
            });
            time::sleep(Duration::from_millis(100)).await;
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let radio = MockRadio::new(AdapterState::PoweredOff);
    let controller = ScanController::new(radio.clone(), ScanConfig::default()).await?;
    if let Err(err) = controller.start(None).await {
        println!("Can't scan yet: {}", err);
    }
    radio.set_adapter_state(AdapterState::PoweredOn);
    while !controller.current_adapter_state().is_powered_on() {
        time::sleep(Duration::from_millis(10)).await;
    }

    let advertisers = spawn_advertisers(radio.clone(), 4);

    let mut discoveries = controller.subscribe_discoveries();
    controller.start(None).await?;
    let watch = time::sleep(Duration::from_secs(2));
    tokio::pin!(watch);
    loop {
        tokio::select! {
            _ = &mut watch => break,
            Some(event) = discoveries.next() => match event {
                ScanEvent::DeviceDiscovered(record) => {
                    println!("new     {} {:>4} dBm {}", record.id, record.rssi, record.display_name())
                }
                ScanEvent::DeviceUpdated(record) => {
                    println!("update  {} {:>4} dBm ({:?})", record.id, record.rssi, record.signal_quality())
                }
                _ => {}
            },
        }
    }
    discoveries.release();
    controller.stop().await?;

    println!("Devices, strongest first:");
    for record in controller.current_devices() {
        println!("  {} {:>4} dBm", record.display_name(), record.rssi);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });
    }
    match controller
        .scan_for_with_cancel(Duration::from_secs(5), &cancel)
        .await
    {
        Ok(devices) => println!("Bounded scan found {} devices", devices.len()),
        Err(err) => println!("Bounded scan ended early: {}", err),
    }

    let devices = controller.scan_for(Duration::from_secs(1)).await?;
    println!("Short scan found {} devices", devices.len());

    advertisers.abort();
    Ok(())
}
