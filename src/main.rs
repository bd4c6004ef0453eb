use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use rust_vio::config::VioConfig;
use rust_vio::io::{DatasetPlayer, SyntheticConfig, SyntheticDataset};
use rust_vio::sensor::source::RawSensorEvent;
use rust_vio::system::VioPipeline;

/// Poll interval for the completion supervisor.
const SUPERVISOR_POLL: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("rust_vio=info")
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading pipeline config from: {}", path);
            VioConfig::load(&path)?
        }
        None => VioConfig::default(),
    };

    let dataset = SyntheticDataset::generate(&SyntheticConfig {
        deterministic_seed: config.deterministic_random_seed,
        ..SyntheticConfig::default()
    });
    println!(
        "Generated synthetic sequence: {} frames, {} events",
        dataset.frame_count(),
        dataset.events().len()
    );

    let mut pipeline = VioPipeline::new(&config)?;

    if config.parallel_run {
        // A player thread acts as the sensor driver, feeding raw
        // events into the data source. The shutdown callback tells it
        // to stop emitting before the stages wind down.
        let stop_feeding = Arc::new(AtomicBool::new(false));
        {
            let stop_feeding = Arc::clone(&stop_feeding);
            pipeline.register_shutdown_callback(move || {
                stop_feeding.store(true, Ordering::Release);
            });
        }
        let handle = pipeline.data_source_handle();
        let receiver = DatasetPlayer::new(dataset.into_events()).stream();
        let feeder = thread::spawn(move || {
            for event in receiver {
                if stop_feeding.load(Ordering::Acquire) {
                    break;
                }
                let delivered = match event {
                    RawSensorEvent::Imu(sample) => handle.fill_imu(sample),
                    RawSensorEvent::Frame(frame) => handle.fill_frame(frame),
                };
                if !delivered {
                    break;
                }
            }
        });

        let finished = pipeline.shutdown_when_finished(SUPERVISOR_POLL);
        // Rendering always happens on this thread.
        pipeline.spin_display();
        if feeder.join().is_err() {
            warn!("feeder thread panicked");
        }
        println!("Pipeline finished: {}", finished);
    } else {
        // Sequential mode: one deterministic pass per packet, display
        // drained in lockstep.
        for packet in dataset.packets() {
            pipeline.spin_once(packet);
            pipeline.spin_display();
        }
        let finished = pipeline.shutdown_when_finished(SUPERVISOR_POLL);
        println!("Pipeline finished: {}", finished);
    }

    Ok(())
}
