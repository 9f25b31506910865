//! Timed playback of recorded events onto a device.

use std::io::{BufRead, Write};
use std::mem;
use std::slice;
use std::thread;
use std::time::{Duration, Instant};

use evemu_parser::{EventReader, EventRecord};

use crate::error::ReplayError;

/// Source of time for a replay session.
pub trait Clock {
    fn now(&mut self) -> Instant;

    /// Blocks until `deadline`. Returns immediately if it has already passed.
    fn sleep_until(&mut self, deadline: Instant);
}

/// Wall clock backed by `thread::sleep`. Millisecond-level accuracy is all that is expected;
/// the scheduling tuner exists to keep it that way.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&mut self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&mut self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
    }
}

impl<C: Clock + ?Sized> Clock for &mut C {
    fn now(&mut self) -> Instant {
        (**self).now()
    }

    fn sleep_until(&mut self, deadline: Instant) {
        (**self).sleep_until(deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub written: usize,
    pub elapsed: Duration,
}

/// One playback run: records from `source` are written to `sink` in order, each at its recorded
/// distance from the first record, moved forward by `offset_us`.
///
/// The timeline is anchored when the first record is read. A record whose adjusted time has
/// already passed is written immediately; the session never sleeps a negative duration.
pub struct ReplaySession<I, W, C> {
    source: I,
    sink: W,
    offset_us: i64,
    clock: C,
    /// Wall-clock start and recorded timestamp of the first record.
    reference: Option<(Instant, i64)>,
    written: usize,
}

impl<I, W, C> ReplaySession<I, W, C>
where
    I: Iterator<Item = evemu_parser::Result<EventRecord>>,
    W: Write,
    C: Clock,
{
    pub fn new(source: I, sink: W, offset_us: i64, clock: C) -> Self {
        Self {
            source,
            sink,
            offset_us,
            clock,
            reference: None,
            written: 0,
        }
    }

    /// Plays until the source is exhausted. An empty source is not an error.
    pub fn run(mut self) -> Result<ReplayStats, ReplayError> {
        while let Some(record) = self.source.next() {
            let record = record?;
            let deadline = self.deadline(&record);
            if deadline > self.clock.now() {
                self.clock.sleep_until(deadline);
            }
            self.write(&record)?;
        }
        let elapsed = match self.reference {
            Some((start, _)) => self.clock.now().saturating_duration_since(start),
            None => Duration::ZERO,
        };
        Ok(ReplayStats {
            written: self.written,
            elapsed,
        })
    }

    fn deadline(&mut self, record: &EventRecord) -> Instant {
        let ts = record.timestamp_us();
        let (start, first_ts) = match self.reference {
            Some(reference) => reference,
            None => {
                let reference = (self.clock.now(), ts);
                self.reference = Some(reference);
                reference
            }
        };
        let position_us = ts.saturating_sub(first_ts).saturating_sub(self.offset_us);
        match u64::try_from(position_us) {
            Ok(us) => start + Duration::from_micros(us),
            Err(_) => start,
        }
    }

    fn write(&mut self, record: &EventRecord) -> Result<(), ReplayError> {
        let index = self.written;
        let raw = to_input_event(record);
        let bytes = input_event_bytes(&raw);
        log::trace!("{record}");
        match self.sink.write(bytes) {
            Ok(n) if n == bytes.len() => {
                self.written += 1;
                Ok(())
            }
            Ok(n) => Err(ReplayError::ShortWrite {
                index,
                written: n,
                expected: bytes.len(),
            }),
            Err(source) => Err(ReplayError::Write { index, source }),
        }
    }
}

/// Replays the `E:` lines of `source` onto `sink`, timed by `clock`.
pub fn replay<R: BufRead, W: Write, C: Clock>(
    source: R,
    sink: W,
    start_offset_us: i64,
    clock: C,
) -> Result<ReplayStats, ReplayError> {
    ReplaySession::new(EventReader::new(source), sink, start_offset_us, clock).run()
}

pub fn to_input_event(record: &EventRecord) -> libc::input_event {
    libc::input_event {
        time: libc::timeval {
            tv_sec: record.sec as libc::time_t,
            tv_usec: record.usec as libc::suseconds_t,
        },
        type_: record.ev_type,
        code: record.code,
        value: record.value,
    }
}

/// The in-memory layout of `struct input_event` is what evdev nodes accept on write.
pub fn input_event_bytes(ev: &libc::input_event) -> &[u8] {
    unsafe {
        slice::from_raw_parts(
            (ev as *const libc::input_event).cast::<u8>(),
            mem::size_of::<libc::input_event>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;
    use std::io;

    const VTEST: &str = "\
N: vtest
I: 0003 0001 0001 0001
B: 00 03
B: 01 00 00 00 40
E: 100.000000 0001 001e 1
E: 100.001000 0000 0000 0
E: 100.005000 0001 001e 0
";

    fn play(recording: &str, offset_us: i64) -> (Result<ReplayStats, ReplayError>, RecordingSink) {
        let clock = VirtualClock::new();
        let mut sink = RecordingSink::new(clock.clone());
        let result = replay(recording.as_bytes(), &mut sink, offset_us, clock);
        (result, sink)
    }

    #[test]
    fn empty_recording_succeeds_without_writes() {
        let (result, sink) = play("N: vtest\nB: 00 03\n", 0);
        let stats = result.unwrap();
        assert_eq!(stats.written, 0);
        assert_eq!(stats.elapsed, Duration::ZERO);
        assert!(sink.writes.is_empty());
    }

    #[test]
    fn reproduces_recorded_gaps() {
        let (result, sink) = play(VTEST, 0);
        assert_eq!(result.unwrap().written, 3);
        assert_eq!(sink.elapsed_us(), vec![0, 1000, 5000]);
    }

    #[test]
    fn positive_offset_skips_ahead() {
        let (result, sink) = play(VTEST, 2000);
        assert_eq!(result.unwrap().elapsed, Duration::from_micros(3000));
        assert_eq!(sink.elapsed_us(), vec![0, 0, 3000]);
        assert_eq!(sink.clock.sleeps(), 1);
    }

    #[test]
    fn negative_offset_delays_everything() {
        let (result, sink) = play(VTEST, -500);
        result.unwrap();
        assert_eq!(sink.elapsed_us(), vec![500, 1500, 5500]);
    }

    #[test]
    fn non_negative_offset_never_sleeps_before_first_event() {
        for offset in [0, 1, 999, 1_000_000] {
            let (_, sink) = play(VTEST, offset);
            assert_eq!(sink.elapsed_us()[0], 0, "offset {offset}");
        }
    }

    #[test]
    fn writes_every_event_once_in_order() {
        let (_, first) = play(VTEST, 0);
        let (_, second) = play(VTEST, 0);
        let events: Vec<_> = first.writes.iter().map(|w| w.event).collect();
        assert_eq!(
            events,
            vec![
                EventRecord::new(100, 0, 1, 0x1e, 1),
                EventRecord::new(100, 1000, 0, 0, 0),
                EventRecord::new(100, 5000, 1, 0x1e, 0),
            ]
        );
        assert_eq!(first.write_calls, 3);
        assert_eq!(first.writes, second.writes);
    }

    #[test]
    fn out_of_order_timestamps_keep_source_order() {
        let recording = "\
E: 5.000000 0001 0010 1
E: 5.003000 0001 0011 1
E: 5.001000 0001 0012 1
";
        let (_, sink) = play(recording, 0);
        let codes: Vec<_> = sink.writes.iter().map(|w| w.event.code).collect();
        assert_eq!(codes, vec![0x10, 0x11, 0x12]);
        assert_eq!(sink.elapsed_us(), vec![0, 3000, 3000]);
    }

    #[test]
    fn short_write_aborts_session() {
        let clock = VirtualClock::new();
        let mut sink = RecordingSink::new(clock.clone());
        sink.short_write_at = Some(1);
        let err = ReplaySession::new(EventReader::new(VTEST.as_bytes()), &mut sink, 0, clock)
            .run()
            .unwrap_err();
        assert!(matches!(
            err,
            ReplayError::ShortWrite {
                index: 1,
                written: 1,
                ..
            }
        ));
        assert_eq!(sink.write_calls, 2);
    }

    #[test]
    fn write_error_aborts_session() {
        let clock = VirtualClock::new();
        let mut sink = RecordingSink::new(clock.clone());
        sink.fail_at = Some(0);
        let err = ReplaySession::new(EventReader::new(VTEST.as_bytes()), &mut sink, 0, clock)
            .run()
            .unwrap_err();
        match err {
            ReplayError::Write { index, source } => {
                assert_eq!(index, 0);
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(sink.writes.is_empty());
    }

    #[test]
    fn malformed_record_aborts_after_earlier_writes() {
        let recording = "E: 1.000000 0001 001e 1\nE: nonsense\nE: 1.000100 0001 001e 0\n";
        let (result, sink) = play(recording, 0);
        assert!(matches!(result, Err(ReplayError::Source(_))));
        assert_eq!(sink.writes.len(), 1);
    }

    #[test]
    fn payload_is_a_kernel_input_event() {
        let record = EventRecord::new(7, 250, 3, 0x35, -12);
        let raw = to_input_event(&record);
        let bytes = input_event_bytes(&raw);
        assert_eq!(bytes.len(), mem::size_of::<libc::input_event>());
        assert_eq!(decode_input_event(bytes), record);
    }
}
