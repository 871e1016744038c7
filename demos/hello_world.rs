use vector_gather::{init_standard_mpi, CommGroup};

fn main() -> Result<(), vector_gather::GatherError> {
    let cg = init_standard_mpi()?;
    println!("Hello world from rank {} of {}", cg.rank(), cg.size());
    Ok(())
}
