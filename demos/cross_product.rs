use cross_mpi::{run, ProcessGroup, RunOutcome};
use std::io;

fn main() {
    env_logger::init();

    // Form a group of 4 worker processes; spawned copies re-enter main and
    // pick up their rank inside init.
    let group = ProcessGroup::init(4).unwrap();
    println!(
        "Process {} of {} initialized (PID: {})",
        group.rank(),
        group.size(),
        std::process::id()
    );

    if group.rank() == 0 {
        println!(
            "Enter the number of vectors (must split evenly across {} workers),",
            group.size()
        );
        println!("then the x y z scalars of array A, then those of array B:");
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    match run(&group, stdin.lock(), &mut stdout) {
        Ok(RunOutcome::Gathered(c)) => println!("Computed {} cross products", c.len() / 3),
        Ok(RunOutcome::Participated) => println!("Rank {} completed its chunk", group.rank()),
        Ok(RunOutcome::Aborted) => println!("Rank {} aborted the run", group.rank()),
        Err(err) => eprintln!("Rank {} failed: {}", group.rank(), err),
    }

    group.destruct();
}
