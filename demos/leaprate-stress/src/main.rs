#[macro_use]
extern crate slog;
extern crate slog_async;
extern crate slog_term;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use leaprate::{system_clock, window_start_of, ArrayMetric, Clock, Config};
use slog::Drain;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long, default_value = "4")]
    threads: usize,
    #[structopt(long, default_value = "5")]
    seconds: u64,
    #[structopt(long, default_value = "2")]
    sample_count: u32,
    #[structopt(long, default_value = "1000")]
    interval_ms: u32,
    //Every n-th request is admitted against the next window
    #[structopt(long, default_value = "0")]
    occupy_every: u64,
    //Print details as JSON instead of thin lines
    #[structopt(long)]
    json: bool,
}

//./target/release/leaprate-stress --threads 8 --seconds 10
//./target/release/leaprate-stress --threads 8 --seconds 10 --occupy-every 100 --json

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, slog_o!("version" => env!("CARGO_PKG_VERSION")));

    // converts log to slog
    let _scope_guard = slog_scope::set_global_logger(logger.clone());
    let _log_guard = slog_stdlog::init()?;

    let options = Options::from_args();
    info!(logger, "options: {:?}", options);

    let cfg = Config {
        sample_count: options.sample_count,
        interval_ms: options.interval_ms,
        occupiable: options.occupy_every > 0,
        ..Default::default()
    };
    let metric = Arc::new(ArrayMetric::new(cfg)?);
    let running = Arc::new(AtomicBool::new(true));

    let workers = (0..options.threads)
        .map(|id| {
            let metric = metric.clone();
            let running = running.clone();
            let occupy_every = options.occupy_every;
            let logger = logger.clone();
            let clock = system_clock();
            std::thread::spawn(move || {
                let mut n = 0u64;
                while running.load(Ordering::Relaxed) {
                    n += 1;
                    let res = if occupy_every > 0 && n % occupy_every == 0 {
                        let len = metric.window_length_ms();
                        match window_start_of(clock.now_millis(), len) {
                            Some(start) => metric.add_occupied_pass(start + len, 1),
                            None => Ok(()),
                        }
                    } else if n % 10 == 0 {
                        metric.add_block(1)
                    } else {
                        metric
                            .add_pass(1)
                            .and_then(|_| metric.add_success(1))
                            .and_then(|_| metric.add_rt((n % 50 + 1) as i64))
                    };
                    if let Err(e) = res {
                        debug!(logger, "worker {} rejected: {}", id, e);
                    }
                }
                n
            })
        })
        .collect::<Vec<_>>();

    for _ in 0..options.seconds {
        std::thread::sleep(Duration::from_secs(1));
        info!(
            logger,
            "pass: {}, block: {}, success: {}, min_rt: {}, avg_rt: {:.2}, waiting: {}",
            metric.pass(),
            metric.block(),
            metric.success(),
            metric.min_rt(),
            metric.avg_rt(),
            metric.waiting()
        );
        for node in metric.details() {
            if options.json {
                println!("{}", serde_json::to_string(&node)?);
            } else {
                println!("{}", node);
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    let total: u64 = workers
        .into_iter()
        .map(|w| w.join().unwrap_or_default())
        .sum();
    info!(logger, "total requests: {}", total);
    Ok(())
}
