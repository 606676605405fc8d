//! Deferred CLI
//!
//! Small demonstrations of the promise library, driven from the command line.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use deferred::coroutines::{Coroutine, Resume, Step};
use deferred::each::{self, Concurrency, EachOptions, Sequence};
use deferred::{utils, Promise, TaskQueue, Value, VERSION};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "deferred")]
#[command(author, version, about = "Cooperative single-threaded promises", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain a lazy source with bounded concurrency
    Each {
        /// Number of items in the source
        #[arg(long, default_value_t = 10)]
        items: usize,
        /// Maximum items in flight (0 = unbounded)
        #[arg(long, default_value_t = 2)]
        concurrency: usize,
    },

    /// Wait for the first COUNT fulfillments
    Some {
        /// Fulfillments wanted
        #[arg(long, default_value_t = 2)]
        count: usize,
        /// Fulfilled items in the source
        #[arg(long, default_value_t = 2)]
        fulfilled: usize,
        /// Rejected items in the source
        #[arg(long, default_value_t = 1)]
        rejected: usize,
    },

    /// Resolve a long chain of promises with each other
    Chain {
        /// Length of the chain
        #[arg(long, default_value_t = 1_000)]
        depth: usize,
    },

    /// Run a routine that yields one task per step
    Coroutine {
        /// Number of steps
        #[arg(long, default_value_t = 3)]
        steps: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);
    tracing::info!(version = VERSION, "deferred starting");

    let queue = TaskQueue::new();
    let _drain = queue.drain_on_drop();
    let started = Instant::now();

    let report = match cli.command {
        Commands::Each { items, concurrency } => run_each(&queue, items, concurrency)?,
        Commands::Some {
            count,
            fulfilled,
            rejected,
        } => run_some(&queue, count, fulfilled, rejected)?,
        Commands::Chain { depth } => run_chain(&queue, depth)?,
        Commands::Coroutine { steps } => run_coroutine(&queue, steps)?,
    };

    let report = json!({
        "result": report,
        "queue": queue.stats(),
        "elapsed_ms": started.elapsed().as_secs_f64() * 1000.0,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("rendering report")?
    );
    Ok(())
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Library errors hold `Rc` values and are not `Send`; render them instead
fn lib<T>(result: deferred::Result<T>) -> anyhow::Result<T> {
    result.map_err(|e| anyhow!("{e}"))
}

fn run_each(queue: &TaskQueue, items: usize, concurrency: usize) -> anyhow::Result<serde_json::Value> {
    let peak = Rc::new(Cell::new(0));
    let processed = Rc::new(Cell::new(0));

    let q = queue.clone();
    let source = Sequence::lazy((0..items).map(move |i| {
        Value::Promise(utils::task(&q, move || Ok(Value::from(i * i))))
    }));

    let p = peak.clone();
    let limit = match concurrency {
        0 => Concurrency::Unbounded,
        k => Concurrency::dynamic(move |in_flight| {
            p.set(p.get().max(in_flight));
            k
        }),
    };

    let done = processed.clone();
    let options = EachOptions::new().on_fulfilled(move |_, _, _| {
        done.set(done.get() + 1);
        Ok(())
    });

    lib(each::of_limit(queue, source, limit, options).wait())?;
    Ok(json!({
        "items": items,
        "processed": processed.get(),
        "peak_in_flight": peak.get(),
    }))
}

fn run_some(
    queue: &TaskQueue,
    count: usize,
    fulfilled: usize,
    rejected: usize,
) -> anyhow::Result<serde_json::Value> {
    let mut source = Vec::with_capacity(fulfilled + rejected);
    for i in 0..fulfilled {
        source.push(lib(Promise::fulfilled(queue, Value::from(format!("ok-{i}"))))?);
    }
    for i in 0..rejected {
        source.push(lib(Promise::rejected(queue, Value::from(format!("err-{i}"))))?);
    }

    let outcome = utils::inspect(&utils::some(queue, count, source));
    Ok(serde_json::to_value(&outcome)?)
}

fn run_chain(queue: &TaskQueue, depth: usize) -> anyhow::Result<serde_json::Value> {
    let root = Promise::new(queue);
    let observed = root.and_then(Ok);

    // Each link hands the observer's handler on to the next pending promise
    let mut last = root;
    for _ in 0..depth {
        let next = Promise::new(queue);
        lib(last.resolve(Value::Promise(next.clone())))?;
        last = next;
    }
    lib(last.resolve(Value::from("end of chain")))?;
    queue.run();

    let value = lib(observed.wait())?;
    Ok(json!({ "depth": depth, "value": value }))
}

fn run_coroutine(queue: &TaskQueue, steps: usize) -> anyhow::Result<serde_json::Value> {
    let log = Rc::new(RefCell::new(Vec::new()));

    let (q, l) = (queue.clone(), log.clone());
    let mut step = 0;
    let mut total = 0.0;
    let routine = move |input: Resume| {
        match input {
            Resume::Start => {}
            Resume::Value(v) => total += v.as_number().unwrap_or(0.0),
            Resume::Error(e) => return Err(e),
        }
        if step == steps {
            return Ok(Step::Complete(Value::from(total)));
        }
        step += 1;
        let (n, l) = (step, l.clone());
        Ok(Step::Yield(Value::Promise(utils::task(&q, move || {
            l.borrow_mut().push(n);
            Ok(Value::from(n))
        }))))
    };

    let total = lib(Coroutine::from_fn(queue, routine).wait())?;
    let log = log.borrow().clone();
    Ok(json!({ "steps": log, "total": total }))
}
