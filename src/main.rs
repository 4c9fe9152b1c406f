use std::env;
use std::fs;
use std::process;

use crossfill::{render_grid, Puzzle, Solver};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        eprintln!("Usage: {} structure words [output]", args[0]);
        process::exit(2);
    }

    let structure = fs::read_to_string(&args[1])
        .expect("Something went wrong reading the structure file");
    let word_list = fs::read_to_string(&args[2])
        .expect("Something went wrong reading the word list");

    let puzzle = Puzzle::parse(&structure, &word_list);

    match Solver::new(&puzzle).solve() {
        Ok(solution) => {
            let display_grid = render_grid(&puzzle, &solution.assignment);

            println!("{:?}", solution.statistics);
            println!("{}", display_grid);

            if let Some(output) = args.get(3) {
                fs::write(output, display_grid).expect("Unable to write output file");
            }
        }
        Err(_) => {
            println!("No solution.");
        }
    }
}
