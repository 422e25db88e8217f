use clap::{arg, value_parser, Arg, Command};
use loopscan::context::{AnalysisContext, AnalysisOptions};
use loopscan::error::Result;
use loopscan::fileformat;
use loopscan::support::diagnostic::DiagnosticContext;
use std::collections::BTreeSet;

fn parse_selection(s: &str) -> Option<BTreeSet<usize>> {
    s.split(',')
        .filter(|x| !x.trim().is_empty())
        .map(|x| x.trim().parse::<usize>().ok())
        .collect()
}

fn run(listing: &str, profile: Option<&str>, options: AnalysisOptions, diag: &DiagnosticContext) -> Result<()> {
    let funcs = fileformat::load_listing(listing, diag)?;
    let profiles = match profile {
        Some(p) => Some(fileformat::load_profile(p, diag)?),
        None => None,
    };
    let mut ctx = AnalysisContext::new(options);
    if let Some(p) = profiles {
        ctx = ctx.with_profiles(p);
    }
    let report = ctx.run(funcs);
    println!("{}", report);
    ctx.diag.remarks().into_iter().for_each(|r| diag.record(r));
    Ok(())
}

pub fn main() {
    env_logger::init();
    let matches = Command::new("loopscan")
        .about("Finds loops that can run their iterations in parallel")
        .arg(arg!(<listing> "The decoded listing (JSON)"))
        .arg(arg!([profile] "Per-loop coverage and iteration counts (JSON)"))
        .arg(
            Arg::new("max-block")
                .long("max-block")
                .takes_value(true)
                .value_parser(value_parser!(usize))
                .help("Split basic blocks longer than this many instructions"),
        )
        .arg(
            Arg::new("fixpoint-limit")
                .long("fixpoint-limit")
                .takes_value(true)
                .value_parser(value_parser!(usize))
                .help("Iteration cap of every fixpoint"),
        )
        .arg(
            Arg::new("loops")
                .long("loops")
                .takes_value(true)
                .help("Comma-separated ids of the loops to analyse"),
        )
        .get_matches();

    let listing = matches.get_one::<String>("listing").unwrap();
    let profile = matches.get_one::<String>("profile").map(String::as_str);
    let mut options = AnalysisOptions::default();
    if let Some(x) = matches.get_one::<usize>("max-block") {
        options.max_block_instructions = *x;
    }
    if let Some(x) = matches.get_one::<usize>("fixpoint-limit") {
        options.fixpoint_limit = *x;
    }
    if let Some(s) = matches.get_one::<String>("loops") {
        match parse_selection(s) {
            Some(sel) => options.selected_loops = Some(sel),
            None => {
                println!("Invalid loop selection: {}", s);
                std::process::exit(-1);
            }
        }
    }

    let diag = DiagnosticContext::default();
    let mut ret = 0;
    if let Err(x) = run(listing.as_str(), profile, options, &diag) {
        println!("Failed to load the listing: {}", x);
        ret = -1;
    }

    let r = diag.remarks();
    r.iter().for_each(|r| println!("{}", r));
    println!("Generates {} remarks", r.len());
    std::process::exit(ret);
}
