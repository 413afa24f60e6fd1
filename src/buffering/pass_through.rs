use super::{Queues, ReadySink, Strategy};
use crate::unit::Ready;
use tokio::time::Instant;

/// Releases every unit as soon as it arrives.
#[derive(Debug, Default)]
pub struct PassThrough;

impl Strategy for PassThrough {
    fn parsed(&mut self, _queues: &mut Queues, _now: Instant, unit: Ready, sink: &mut dyn ReadySink) {
        sink.ready(unit);
    }

    fn abort(&mut self) {}
}

#[cfg(test)]
mod test {
    use crate::buffering::test::{audio, timestamps, video};
    use crate::buffering::{Buffering, BufferingConfig};
    use crate::unit::StreamKind;
    use tokio::time::Instant;

    #[test]
    fn releases_immediately() {
        let mut b = Buffering::new(&BufferingConfig::PassThrough);
        let now = Instant::now();
        let mut out = vec![];
        b.parsed(now, video(0.5), &mut out);
        b.parsed(now, audio(0.0), &mut out);
        b.parsed(now, video(0.0), &mut out);
        assert_eq!(
            timestamps(&out),
            vec![
                (StreamKind::H264, 0.5),
                (StreamKind::Aac, 0.0),
                (StreamKind::H264, 0.0),
            ]
        );
        assert_eq!(b.pending(), 0);
        assert_eq!(b.tick_period(), None);
        assert_eq!(b.next_deadline(), None);
    }
}
