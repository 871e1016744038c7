//! MPI-based implementation of CommGroup.
use crate::{CommFuture, CommGroup, DataType, GatherError, Result};
use lazy_static::lazy_static;
use futures::future;
use log::trace;
use mpi_sys::{
    MPI_Comm, MPI_Comm_rank, MPI_Comm_size, MPI_Finalize, MPI_Iallgather, MPI_Iallgatherv,
    MPI_Init_thread, MPI_Request, MPI_Test, MPI_Wait, RSMPI_COMM_WORLD, RSMPI_STATUS_IGNORE,
    RSMPI_THREAD_MULTIPLE, RSMPI_UINT8_T,
};
use std::mem::MaybeUninit;
use std::os::raw::c_int;
use std::sync::Mutex;
use std::task::Poll;

const MPI_SUCCESS: c_int = 0;

lazy_static! {
    static ref MPI_INIT_LOCK: Mutex<i32> = Mutex::new(0);
}

/// Initialize MPI and return a group spanning all processes of the job.
///
/// Only one group may be alive per process; MPI is finalized when it is
/// dropped.
pub fn init_standard_mpi() -> Result<MpiCommGroup> {
    let mut init_lock = MPI_INIT_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if *init_lock != 0 {
        return Err(GatherError::AlreadyInitialized);
    }
    let mut provided: c_int = 0;
    let (code, required) = unsafe {
        let code = MPI_Init_thread(
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            RSMPI_THREAD_MULTIPLE,
            &mut provided,
        );
        (code, RSMPI_THREAD_MULTIPLE)
    };
    check(code, "MPI_Init_thread")?;
    if provided != required {
        unsafe {
            MPI_Finalize();
        }
        return Err(GatherError::Transport {
            operation: "MPI_Init_thread",
            code: provided,
        });
    }
    *init_lock = 1;
    Ok(MpiCommGroup {
        comm: unsafe { RSMPI_COMM_WORLD },
    })
}

impl Drop for MpiCommGroup {
    fn drop(&mut self) {
        unsafe {
            MPI_Finalize();
        }
        let mut init_lock = MPI_INIT_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *init_lock = 0;
    }
}

pub struct MpiCommGroup {
    comm: MPI_Comm,
}

impl CommGroup for MpiCommGroup {
    fn rank(&self) -> u32 {
        let mut value = 0;
        unsafe {
            MPI_Comm_rank(self.comm, &mut value);
        }
        // A failed query yields a rank outside the group, which the gather
        // rejects before communicating.
        value.try_into().unwrap_or(u32::MAX)
    }

    fn size(&self) -> u32 {
        let mut value = 0;
        unsafe {
            MPI_Comm_size(self.comm, &mut value);
        }
        value.try_into().unwrap_or(0)
    }

    fn all_gather<T: DataType + 'static>(&self, data: &T) -> CommFuture<'_, Vec<T>> {
        let encoded = bincode::serialize(data);
        let comm = self.comm;
        let size = self.size() as usize;
        Box::into_pin(Box::new(async move {
            let buffer = encoded?;
            let mut recv = vec![0u8; buffer.len() * size];
            let count = to_count(buffer.len())?;
            trace!("all_gather: {} bytes per rank over {} ranks", buffer.len(), size);
            unsafe {
                let mut req = MaybeUninit::uninit();
                let code = MPI_Iallgather(
                    buffer.as_ptr() as *const _,
                    count,
                    RSMPI_UINT8_T,
                    recv.as_mut_ptr() as *mut _,
                    count,
                    RSMPI_UINT8_T,
                    comm,
                    req.as_mut_ptr(),
                );
                check(code, "MPI_Iallgather")?;
                Request::new(req.assume_init()).complete().await?;
            }

            if buffer.is_empty() {
                return Ok(vec![T::default(); size]);
            }
            recv.chunks(buffer.len())
                .map(|chunk| bincode::deserialize(chunk).map_err(GatherError::from))
                .collect()
        }))
    }

    fn all_gather_bytes<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        counts: &'a [usize],
        displacements: &'a [usize],
    ) -> CommFuture<'a, ()> {
        let comm = self.comm;
        Box::into_pin(Box::new(async move {
            let send_count = to_count(send.len())?;
            let counts: Vec<c_int> = counts.iter().map(|&c| to_count(c)).collect::<Result<_>>()?;
            let displacements: Vec<c_int> = displacements
                .iter()
                .map(|&d| to_count(d))
                .collect::<Result<_>>()?;
            trace!("all_gather_bytes: sending {} bytes", send.len());
            unsafe {
                let mut req = MaybeUninit::uninit();
                let code = MPI_Iallgatherv(
                    send.as_ptr() as *const _,
                    send_count,
                    RSMPI_UINT8_T,
                    recv.as_mut_ptr() as *mut _,
                    counts.as_ptr(),
                    displacements.as_ptr(),
                    RSMPI_UINT8_T,
                    comm,
                    req.as_mut_ptr(),
                );
                check(code, "MPI_Iallgatherv")?;
                Request::new(req.assume_init()).complete().await?;
            }
            Ok(())
        }))
    }
}

fn to_count(value: usize) -> Result<c_int> {
    value.try_into().map_err(|_| GatherError::CountOverflow {
        value: value as u64,
    })
}

fn check(code: c_int, operation: &'static str) -> Result<()> {
    if code == MPI_SUCCESS {
        Ok(())
    } else {
        Err(GatherError::Transport { operation, code })
    }
}

/// An in-flight nonblocking collective.
///
/// MPI keeps using the send and receive buffers until the request completes,
/// and collective requests cannot be cancelled, so dropping an incomplete
/// request waits for it.
struct Request {
    raw: MPI_Request,
    done: bool,
}

impl Request {
    fn new(raw: MPI_Request) -> Self {
        Self { raw, done: false }
    }

    /// Test if the request is complete.
    fn test(&mut self) -> Result<bool> {
        let mut flag = 0;
        let code = unsafe { MPI_Test(&mut self.raw, &mut flag, RSMPI_STATUS_IGNORE) };
        check(code, "MPI_Test")?;
        self.done = flag != 0;
        Ok(self.done)
    }

    /// Resolve once the request completes, yielding to the executor between
    /// tests.
    async fn complete(mut self) -> Result<()> {
        future::poll_fn(|cx| match self.test() {
            Ok(true) => Poll::Ready(Ok(())),
            Ok(false) => {
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            Err(err) => Poll::Ready(Err(err)),
        })
        .await
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if !self.done {
            unsafe {
                MPI_Wait(&mut self.raw, RSMPI_STATUS_IGNORE);
            }
        }
    }
}
