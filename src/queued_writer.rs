use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::BytesMut;
use may::queue::mpsc::Queue;
use may::sync::Mutex;

#[derive(Debug)]
struct BufWriter<W: Write> {
    writer: W,
    buf: BytesMut,
}

impl<W: Write> BufWriter<W> {
    fn new(writer: W) -> Self {
        BufWriter {
            writer,
            buf: BytesMut::with_capacity(32 * 1024),
        }
    }

    #[inline]
    fn put_data(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data)
    }

    #[inline]
    fn write_all(&mut self) -> io::Result<()> {
        let ret = self.writer.write_all(&self.buf);
        self.buf.clear();
        ret
    }
}

/// Outbound frame queue over one socket. Concurrent producers push; the
/// first of them drains the queue and flushes everything in push order as a
/// single write. The first write failure latches: the owning connection is
/// expected to tear itself down once a push reports an error.
#[derive(Debug)]
pub(crate) struct QueuedWriter<W: Write> {
    data_count: AtomicUsize,
    data_queue: Queue<Vec<u8>>,
    writer: Mutex<BufWriter<W>>,
    poisoned: AtomicBool,
}

impl<W: Write> QueuedWriter<W> {
    pub fn new(writer: W) -> Self {
        QueuedWriter {
            data_count: AtomicUsize::new(0),
            data_queue: Queue::new(),
            writer: Mutex::new(BufWriter::new(writer)),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Queue one frame; flushes if no other producer already is. Note that
    /// a frame handed to a concurrent flusher can still fail on the socket
    /// after this returns `Ok`; the reader side surfaces those failures.
    pub fn write(&self, data: Vec<u8>) -> io::Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "writer already failed",
            ));
        }

        self.data_queue.push(data);
        // only the first producer performs the write; the rest just queue
        if self.data_count.fetch_add(1, Ordering::AcqRel) == 0 {
            let mut writer = self.writer.lock().unwrap();

            loop {
                let mut cnt = 0;
                while let Some(data) = self.data_queue.pop() {
                    writer.put_data(&data);
                    cnt += 1;
                }

                // more frames may have been queued while we drained
                if self.data_count.fetch_sub(cnt, Ordering::AcqRel) == cnt {
                    break;
                }
            }

            if let Err(e) = writer.write_all() {
                self.poisoned.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }
}
