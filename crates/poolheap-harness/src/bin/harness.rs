//! CLI entrypoint for the poolheap benchmark driver.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use poolheap_abi::NativeHeap;
use poolheap_arena::config::{DEFAULT_GROW_GRANULE, parse_byte_size};
use poolheap_arena::{HeapConfig, HeapMode};
use poolheap_harness::driver::{DEFAULT_SEED, TEST_ALIGNMENT, TEST_COUNT, TEST_SIZE};
use poolheap_harness::{
    AllocKind, DriverConfig, HeapTarget, LogEmitter, Lcg, compare_transparency,
    ensure_transparent, pool_heap, replay_grow_scenario, run_malloc_test, run_memalign_test,
    run_suite,
};

/// Heap benchmark driver for poolheap.
#[derive(Debug, Parser)]
#[command(name = "harness")]
#[command(about = "Deterministic alloc/free benchmark for the pool heap and the native heap")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HeapChoice {
    Pool,
    Native,
}

#[derive(Debug, Args)]
struct SequenceArgs {
    /// Allocation slots per run.
    #[arg(long, default_value_t = TEST_COUNT)]
    count: usize,
    /// Largest request size in bytes.
    #[arg(long, default_value_t = TEST_SIZE)]
    max_size: usize,
    /// Alignment for the memalign run.
    #[arg(long, default_value_t = TEST_ALIGNMENT)]
    alignment: usize,
    /// PRNG seed (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_seed, default_value_t = DEFAULT_SEED)]
    seed: u32,
    /// Check alignment and overlap of every allocation.
    #[arg(long)]
    verify: bool,
    /// Backing pool size limit (accepts K/M/G suffixes).
    #[arg(long, value_parser = parse_bytes, default_value = "512M")]
    pool_bytes: usize,
    /// Minimum growth request (accepts K/M/G suffixes).
    #[arg(long, value_parser = parse_bytes, default_value_t = DEFAULT_GROW_GRANULE)]
    grow_granule: usize,
    /// Heap mode (strict or hardened).
    #[arg(long, default_value = "strict")]
    mode: String,
    /// Structured JSONL log path (if omitted, logs go to stdout).
    #[arg(long)]
    log: Option<PathBuf>,
    /// Run id embedded in trace ids.
    #[arg(long, default_value = "run")]
    run_id: String,
    /// Output path for the JSON report (if omitted, prints to stdout).
    #[arg(long)]
    output: Option<PathBuf>,
}

impl SequenceArgs {
    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            count: self.count,
            max_size: self.max_size,
            alignment: self.alignment,
            seed: self.seed,
            verify: self.verify,
        }
    }

    fn heap_config(&self) -> HeapConfig {
        HeapConfig::default()
            .with_mode(HeapMode::from_str_loose(&self.mode))
            .with_pool_limit(self.pool_bytes)
            .with_grow_granule(self.grow_granule)
    }

    fn emitter(&self) -> std::io::Result<LogEmitter> {
        match &self.log {
            Some(path) => LogEmitter::to_file(path, "harness", &self.run_id),
            None => Ok(LogEmitter::to_stdout("harness", &self.run_id)),
        }
    }

    fn write_report(&self, json: &str) -> std::io::Result<()> {
        match &self.output {
            Some(path) => std::fs::write(path, json),
            None => {
                println!("{json}");
                Ok(())
            }
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the alloc/free sequence against one heap.
    Run {
        /// Heap under test.
        #[arg(long, value_enum, default_value = "pool")]
        heap: HeapChoice,
        /// Run only this sequence (default: malloc then memalign).
        #[arg(long, value_enum)]
        kind: Option<AllocKind>,
        #[command(flatten)]
        sequence: SequenceArgs,
    },
    /// Run the sequence on the pool heap and the native heap and compare them.
    Compare {
        #[command(flatten)]
        sequence: SequenceArgs,
    },
    /// Replay grow requests against a fresh bump grower.
    GrowScenario {
        /// Pool capacity in bytes (accepts K/M/G suffixes).
        #[arg(long, value_parser = parse_bytes)]
        capacity: usize,
        /// Comma-separated signed growth requests.
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        requests: Vec<isize>,
    },
}

fn parse_bytes(raw: &str) -> Result<usize, String> {
    parse_byte_size(raw).ok_or_else(|| format!("invalid byte size: '{raw}'"))
}

fn parse_seed(raw: &str) -> Result<u32, String> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("invalid seed '{raw}': {e}"))
}

fn run_one(
    target: &dyn HeapTarget,
    kind: Option<AllocKind>,
    sequence: &SequenceArgs,
) -> Result<String, Box<dyn std::error::Error>> {
    let config = sequence.driver_config();
    let mut log = sequence.emitter()?;
    let json = match kind {
        None => serde_json::to_string_pretty(&run_suite(target, &config, &mut log)?)?,
        Some(kind) => {
            let mut rng = Lcg::new(config.seed);
            let report = match kind {
                AllocKind::Malloc => run_malloc_test(target, &config, &mut rng, &mut log)?,
                AllocKind::Memalign => run_memalign_test(target, &config, &mut rng, &mut log)?,
            };
            serde_json::to_string_pretty(&report)?
        }
    };
    log.flush()?;
    Ok(json)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            heap,
            kind,
            sequence,
        } => {
            let json = match heap {
                HeapChoice::Native => run_one(&NativeHeap, kind, &sequence)?,
                HeapChoice::Pool => {
                    let pool = pool_heap(&sequence.heap_config())?;
                    run_one(&pool, kind, &sequence)?
                }
            };
            sequence.write_report(&json)?;
        }
        Command::Compare { sequence } => {
            let pool = pool_heap(&sequence.heap_config())?;
            let mut log = sequence.emitter()?;
            let report =
                compare_transparency(&pool, &NativeHeap, &sequence.driver_config(), &mut log)?;
            log.flush()?;
            sequence.write_report(&serde_json::to_string_pretty(&report)?)?;
            ensure_transparent(&report)?;
        }
        Command::GrowScenario { capacity, requests } => {
            if requests.is_empty() {
                return Err("--requests must name at least one growth amount".into());
            }
            for step in replay_grow_scenario(capacity, &requests)? {
                match (step.offset, &step.error) {
                    (Some(offset), _) => println!(
                        "grow({}) -> base+{offset}, used={}",
                        step.requested, step.used
                    ),
                    (None, Some(err)) => {
                        println!("grow({}) -> refused ({err}), used={}", step.requested, step.used)
                    }
                    (None, None) => {
                        println!("grow({}) -> refused, used={}", step.requested, step.used)
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_accept_hex_and_decimal() {
        assert_eq!(parse_seed("0xab12cd34"), Ok(DEFAULT_SEED));
        assert_eq!(parse_seed("42"), Ok(42));
        assert!(parse_seed("0xZZ").is_err());
    }

    #[test]
    fn cli_parses_grow_scenario_with_negative_requests() {
        let cli = Cli::try_parse_from([
            "harness",
            "grow-scenario",
            "--capacity",
            "1K",
            "--requests",
            "400,-8,300",
        ])
        .unwrap();
        match cli.command {
            Command::GrowScenario { capacity, requests } => {
                assert_eq!(capacity, 1024);
                assert_eq!(requests, vec![400, -8, 300]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_defaults_match_reference_parameters() {
        let cli = Cli::try_parse_from(["harness", "run", "--heap", "native"]).unwrap();
        let Command::Run { sequence, kind, .. } = cli.command else {
            panic!("expected run");
        };
        assert!(kind.is_none());
        assert_eq!(sequence.driver_config(), DriverConfig::default());
        assert_eq!(sequence.heap_config().pool_limit, 512 * 1024 * 1024);
    }
}
