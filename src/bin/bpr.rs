/**
 * BprReco
 * Copyright (C) 2018 Sebastian Schelter
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

use std::env;
use std::error::Error;
use std::fs;
use std::time::Instant;

use getopts::Options;

use bprreco::io;
use bprreco::stats::IdMapping;
use bprreco::{IncidenceStore, TrainingConfig, TrainingEngine};

fn main() {

    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt("i", "inputfile", "Input file name (required). The input consists of interactions \
        between user and items. The input file must contain a user and item pair per line, \
        separated by a tab.", "PATH");
    opts.optopt("o", "modelfile", "File to save the trained model to (optional).", "PATH");
    opts.optopt("r", "recommendationsfile", "Output file name for the recommendations (optional, \
        output will be written to stdout by default).", "PATH");
    opts.optopt("n", "num-recommendations", "Number of items to recommend per user (optional, \
        defaults to 10).", "NUMBER");
    opts.optopt("c", "config", "JSON file with training parameters (optional, missing \
        parameters keep their defaults).", "PATH");
    opts.optopt("s", "seed", "Seed for the random number generator (optional, overrides the \
        seed from the configuration).", "NUMBER");
    opts.optflag("h", "help", "Print this help menu");

    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(failure) => {
            let hint = failure.to_string();
            return print_usage_and_exit(&program, opts, Some(&hint))
        },
    };

    if matches.opt_present("h") {
        return print_usage_and_exit(&program, opts, None);
    }

    let interactions_path = match matches.opt_str("i") {
        Some(path) => path,
        None => {
            return print_usage_and_exit(
                &program,
                opts,
                Some("Please specify an inputfile via --inputfile."),
            );
        },
    };

    let model_path = matches.opt_str("o");
    let recommendations_path = matches.opt_str("r");
    let config_path = matches.opt_str("c");

    let n: usize = match matches.opt_get_default("n", 10) {
        Ok(n) => n,
        Err(failure) => {
            let hint = format!("Problem with option 'n': {}", failure.to_string());
            return print_usage_and_exit(&program, opts, Some(&hint))
        },
    };

    let seed: Option<u64> = match matches.opt_get("s") {
        Ok(seed) => seed,
        Err(failure) => {
            let hint = format!("Problem with option 's': {}", failure.to_string());
            return print_usage_and_exit(&program, opts, Some(&hint))
        },
    };

    if let Err(failure) = train_and_recommend(
        &interactions_path,
        config_path,
        seed,
        model_path,
        recommendations_path,
        n,
    ) {
        eprintln!("{}", failure);
        std::process::exit(1);
    }
}

fn print_usage_and_exit(
    program: &str,
    opts: Options,
    hint: Option<&str>
) {

    if let Some(hint) = hint {
        eprintln!("\n{}\n", hint);
    }

    let brief = format!("Usage: {} [options]", program);
    eprint!("{}", opts.usage(&brief));

    let status = exit_status(hint);
    if status != 0 {
        std::process::exit(status);
    }
}

/// Asking for help is fine, everything else that ends up at the usage text is a failure.
fn exit_status(hint: Option<&str>) -> i32 {
    match hint {
        Some(_) => 1,
        None => 0,
    }
}

fn train_and_recommend(
    interactions_path: &str,
    config_path: Option<String>,
    seed: Option<u64>,
    model_path: Option<String>,
    recommendations_path: Option<String>,
    n: usize,
) -> Result<(), Box<dyn Error>> {

    let mut config = match config_path {
        Some(path) => TrainingConfig::from_json(&fs::read_to_string(path)?)?,
        None => TrainingConfig::default(),
    };

    if seed.is_some() {
        config.random_seed = seed;
    }

    println!("Reading interactions from {}", interactions_path);

    let mut reader = io::csv_reader(interactions_path)?;
    let mut mapping = IdMapping::new();
    let mut store = IncidenceStore::new();
    io::read_named_interactions(&mut reader, &mut mapping, &mut store)?;

    println!(
        "Found {} interactions between {} users and {} items.",
        store.size(),
        mapping.num_users(),
        mapping.num_items(),
    );

    let training_start = Instant::now();

    let mut engine = TrainingEngine::new(config, store)?;
    engine.train()?;

    println!("Trained {} factors in {}ms", engine.config().num_factors,
        training_start.elapsed().as_millis());

    if let Some(path) = model_path {
        println!("Writing model to {}", path);
        engine.save_model(&path)?;
    }

    println!("Writing recommendations...");
    io::write_recommendations(&engine, &mapping, n, recommendations_path)?;

    Ok(())
}
