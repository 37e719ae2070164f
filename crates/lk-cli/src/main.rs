use anyhow::Context;
use clap::{Parser, Subcommand};
use lk_runtime::{Runtime, RuntimeConfig, Workload, WorkloadParams};
use log::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in workload on the simulated machine
    Run {
        /// Workload name (see `lk list`)
        workload: Workload,

        /// Number of harts
        #[arg(long, default_value_t = 1)]
        harts: usize,

        /// Instructions between timer interrupts; 0 disables the timer
        #[arg(long, default_value_t = 50)]
        timer_interval: u64,

        /// Ticks a thread runs before an equal-priority peer gets a turn
        #[arg(long, default_value_t = 5)]
        quantum: i32,

        /// Worker threads (pairs for sem-pingpong)
        #[arg(long, default_value_t = 2)]
        threads: usize,

        /// Iterations per worker
        #[arg(long, default_value_t = 10)]
        iterations: u32,

        /// Give up after this many instructions
        #[arg(long, default_value_t = 5_000_000)]
        deadline: u64,

        /// Data memory size in words
        #[arg(long, default_value_t = 1024)]
        memory: usize,
    },
    /// List the built-in workloads
    List,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workload,
            harts,
            timer_interval,
            quantum,
            threads,
            iterations,
            deadline,
            memory,
        } => {
            let config = RuntimeConfig {
                harts,
                timer_interval: (timer_interval > 0).then_some(timer_interval),
                max_instructions: deadline,
                memory_words: memory,
                quantum_ticks: quantum,
                workload,
                params: WorkloadParams {
                    threads,
                    iterations,
                },
            };
            info!("starting {:?}", config);
            let mut runtime =
                Runtime::new(config).with_context(|| format!("setting up {}", workload))?;
            let report = runtime
                .run()
                .with_context(|| format!("running {}", workload))?;
            print!("{}", report);
            println!("{}: all checks passed", workload);
        }
        Commands::List => {
            for w in Workload::ALL {
                println!("{:<16} {}", w.name(), w.description());
            }
        }
    }

    Ok(())
}
