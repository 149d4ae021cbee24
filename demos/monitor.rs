use plugwise_smile::{DocumentMode, SmileClient};
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> plugwise_smile::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let host = args.get(1).expect("usage: monitor <host> <password> [--https]");
    let password = args.get(2).expect("usage: monitor <host> <password> [--https]");
    let use_https = args.iter().any(|a| a == "--https");
    let username = env::var("SMILE_USERNAME").unwrap_or_else(|_| "smile".to_string());

    let mut builder = SmileClient::builder(host.as_str())
        .credentials(username, password.as_str())
        .document_mode(DocumentMode::Session)
        .on_event(|event| {
            println!("{event:?}");
        })
        .on_snapshot(|devices| {
            for device in devices {
                if let (Some(current), Some(setpoint)) = (device.current_temp, device.setpoint_temp) {
                    println!(
                        "[{}] {:.1}\u{00b0}C -> {:.1}\u{00b0}C | preset: {} | schedule: {}",
                        device.name,
                        current,
                        setpoint,
                        device.active_preset.as_deref().unwrap_or("-"),
                        device.selected_schedule.as_deref().unwrap_or("-"),
                    );
                }
                if let Some(outdoor) = &device.outdoor_temp {
                    println!(
                        "Outdoor: {outdoor}\u{00b0}C | boiler: {:?}{}",
                        device.boiler_state,
                        if device.domestic_hot_water_state == Some(true) { " | DHW" } else { "" },
                    );
                }
            }
        });

    if use_https {
        builder = builder.protocol("https").port(443);
    }

    let mut client = builder.build()?;

    println!("Connecting to {host}...");
    client.ping().await?;
    println!("Connected. Refreshing every 30s...");

    loop {
        if let Err(e) = client.refresh().await {
            eprintln!("Refresh error: {e}");
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
}
