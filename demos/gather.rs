//! Gather example over MPI. Rank `r` contributes `r + 1` copies of `r`.
//!
//! Run with: mpirun -n 4 cargo run --features mpi --bin gather
use futures::executor;
use log::{info, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::error::Error;
use std::iter;
use vector_gather::{gather_all_async, init_standard_mpi, CommGroup};

fn main() -> Result<(), Box<dyn Error>> {
    TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;
    let cg = init_standard_mpi()?;
    let rank = cg.rank();
    let size = cg.size();

    let local = vec![rank as i32; rank as usize + 1];
    let mut result = vec![];
    // Gather twice; the second call reuses the already sized buffer.
    for _ in 0..2 {
        executor::block_on(gather_all_async(&mut result, &local, &cg))?;
    }

    let expected: Vec<i32> = (0..size as i32)
        .flat_map(|r| iter::repeat(r).take(r as usize + 1))
        .collect();
    if result != expected {
        return Err(format!("rank {}: gathered {:?}, expected {:?}", rank, result, expected).into());
    }
    info!("Rank {} gathered {:?}", rank, result);
    Ok(())
}
