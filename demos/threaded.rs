use cross_mpi::{run_coordinator, run_member, RunOutcome, ThreadGroup};
use std::io::Cursor;
use std::thread;

// N = 4 vectors, split two per worker: A then B, one vector per line.
const INPUT: &str = "4
1 0 0
0 1 0
1 1 0
0 0 1
0 1 0
0 0 1
1 0 0
1 0 0
";

fn main() {
    env_logger::init();

    let mut handles = ThreadGroup::create(2).unwrap().into_iter();
    let coordinator = handles.next().unwrap();

    let members: Vec<_> = handles
        .map(|group| thread::spawn(move || run_member(&group).unwrap()))
        .collect();

    let mut output = Vec::new();
    let outcome = run_coordinator(&coordinator, Cursor::new(INPUT), &mut output).unwrap();

    for member in members {
        member.join().unwrap();
    }

    print!("{}", String::from_utf8(output).unwrap());
    if let RunOutcome::Gathered(c) = outcome {
        println!("Computed {} cross products on 2 simulated workers", c.len() / 3);
    }
}
