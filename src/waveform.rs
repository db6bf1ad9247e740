//! Waveform controller: owns the options, the sample storage and one
//! renderer, and coalesces redraw requests.
//!
//! A redraw is split in two so the storage query can run elsewhere:
//! [`Waveform::begin_redraw`] hands out a [`RedrawTicket`] and moves the
//! controller to `Rendering`, [`Waveform::complete_redraw`] applies the
//! query result. While a ticket is outstanding no second one is issued;
//! triggers arriving in the meantime schedule exactly one follow-up redraw.

use tracing::{debug, info, warn};

use crate::config::{Options, OptionsPatch};
use crate::error::Result;
use crate::renderer::{Renderer, Style};
use crate::storage::{Anchor, Query, ReducedFrame, RingStorage, SharedStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedrawState {
    /// Nothing to draw.
    Idle,
    /// A redraw was requested and no query has been issued yet.
    Pending,
    /// A query is in flight.
    Rendering,
    /// The last redraw failed. Waits for the next push, set or update.
    Stalled,
}

/// Typed lifecycle events. Every method has an empty default.
pub trait WaveformObserver: Send {
    fn on_push(&mut self, _samples: &[f32], _length: u64) {}

    fn on_set(&mut self, _length: u64) {}

    fn on_update(&mut self, _options: &Options) {}

    /// A frame was reduced and is about to be drawn.
    fn on_redraw(&mut self, _frame: &ReducedFrame) {}

    /// Pixels are about to be emitted.
    fn on_render(&mut self) {}
}

/// An issued redraw. Must be passed back to [`Waveform::complete_redraw`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedrawTicket {
    pub query: Query,
    /// Only the newest columns are queried; the renderer scrolls the rest.
    pub shift: bool,
    epoch: u64,
}

pub struct Waveform<R: Renderer> {
    storage: SharedStorage,
    options: Options,
    style: Style,
    renderer: R,
    observers: Vec<Box<dyn WaveformObserver>>,
    state: RedrawState,
    /// A trigger arrived while rendering.
    stale: bool,
    /// Logical end of the last drawn frame and the option epoch it used.
    drawn: Option<(f64, u64)>,
    /// Bumped whenever the drawn image stops matching the stream or options.
    epoch: u64,
    frames_drawn: u64,
}

impl<R: Renderer> Waveform<R> {
    pub fn new(options: Options, mut renderer: R) -> Result<Self> {
        options.validate()?;
        let storage = RingStorage::with_capacity(options.buffer_size)?;
        let style = Style::from_options(&options)?;
        renderer.resize(options.viewport)?;

        info!(
            "Created waveform with {} sample buffer, {} columns at scale {}",
            options.buffer_size, options.viewport.width, options.scale
        );

        Ok(Self {
            storage: SharedStorage::new(storage),
            options,
            style,
            renderer,
            observers: Vec::new(),
            state: RedrawState::Idle,
            stale: false,
            drawn: None,
            epoch: 0,
            frames_drawn: 0,
        })
    }

    pub fn add_observer<O: WaveformObserver + 'static>(&mut self, observer: O) {
        self.observers.push(Box::new(observer));
    }

    /// Append samples and schedule a redraw.
    pub fn push(&mut self, samples: &[f32]) {
        let length = self.storage.append(samples);
        for observer in &mut self.observers {
            observer.on_push(samples, length);
        }
        self.request_redraw();
    }

    /// Replace the stream with `samples`, starting a new cursor at zero.
    pub fn set(&mut self, samples: &[f32]) {
        let length = {
            let mut storage = self.storage.write();
            storage.clear();
            storage.append(samples)
        };
        self.epoch += 1;
        self.drawn = None;
        for observer in &mut self.observers {
            observer.on_set(length);
        }
        self.request_redraw();
    }

    /// Merge a partial configuration.
    ///
    /// Invalid patches and renderer resize failures leave the controller
    /// exactly as it was.
    pub fn update(&mut self, patch: &OptionsPatch) -> Result<()> {
        let mut next = self.options.clone();
        next.merge(patch)?;
        let style = Style::from_options(&next)?;
        if next.viewport != self.options.viewport {
            self.renderer.resize(next.viewport)?;
        }

        self.options = next;
        self.style = style;
        self.epoch += 1;
        for observer in &mut self.observers {
            observer.on_update(&self.options);
        }
        self.request_redraw();
        Ok(())
    }

    /// Mark the view dirty. Returns `true` if this scheduled a new redraw.
    pub fn request_redraw(&mut self) -> bool {
        match self.state {
            RedrawState::Idle | RedrawState::Stalled => {
                self.state = RedrawState::Pending;
                true
            }
            RedrawState::Pending => {
                debug!("Redraw already pending, coalescing trigger");
                false
            }
            RedrawState::Rendering => {
                self.stale = true;
                false
            }
        }
    }

    /// Issue the pending redraw, if any.
    ///
    /// Returns `None` when nothing is pending, when a query is already in
    /// flight, or when a scroll would move the image by less than a pixel.
    pub fn begin_redraw(&mut self) -> Result<Option<RedrawTicket>> {
        if self.state != RedrawState::Pending {
            return Ok(None);
        }

        let mut query = match self.options.query() {
            Ok(query) => query,
            Err(e) => {
                self.state = RedrawState::Stalled;
                return Err(e);
            }
        };

        let shift = match (self.shift_columns(), self.drawn) {
            (Some(0), _) => {
                self.state = RedrawState::Idle;
                return Ok(None);
            }
            (Some(columns), Some((end, _))) => {
                debug!("Scrolling waveform by {} columns", columns);
                query.anchor = Anchor::Exact(end);
                query.count = columns;
                true
            }
            _ => false,
        };

        self.state = RedrawState::Rendering;
        Ok(Some(RedrawTicket {
            query,
            shift,
            epoch: self.epoch,
        }))
    }

    /// Whole columns the live tail advanced since the last drawn frame, when
    /// the renderer can scroll and nothing else invalidated the image.
    fn shift_columns(&self) -> Option<usize> {
        if !self.options.shift || self.options.offset.is_some() || !self.renderer.supports_shift()
        {
            return None;
        }

        let (end, epoch) = self.drawn?;
        if epoch != self.epoch {
            return None;
        }

        let advance = (self.storage.length() as f64 - end) / self.options.scale;
        if advance < 0.0 {
            return None;
        }

        let columns = advance.floor() as usize;
        (columns < self.options.viewport.width as usize).then_some(columns)
    }

    /// Apply the result of a ticket's query and draw it.
    pub fn complete_redraw(
        &mut self,
        ticket: RedrawTicket,
        result: Result<ReducedFrame>,
    ) -> Result<()> {
        let stale = std::mem::take(&mut self.stale);

        let mut frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Waveform query failed: {}", e);
                self.drawn = None;
                self.state = if stale {
                    RedrawState::Pending
                } else {
                    RedrawState::Stalled
                };
                return Err(e);
            }
        };
        if ticket.shift {
            frame.tail = Some(frame.len());
        }

        // Clear the dirty flag first so observers may push or update.
        self.state = RedrawState::Idle;
        for observer in &mut self.observers {
            observer.on_redraw(&frame);
        }
        for observer in &mut self.observers {
            observer.on_render();
        }

        let drawn = self.renderer.draw(&frame, &self.style);
        if stale {
            self.request_redraw();
        }

        match drawn {
            Ok(()) => {
                self.frames_drawn += 1;
                self.drawn = (ticket.epoch == self.epoch)
                    .then(|| (frame.start + frame.len() as f64 * frame.scale, ticket.epoch));
                Ok(())
            }
            Err(e) => {
                warn!("Waveform draw failed: {}", e);
                self.drawn = None;
                if self.state != RedrawState::Pending {
                    self.state = RedrawState::Stalled;
                }
                Err(e)
            }
        }
    }

    /// Run a pending redraw synchronously. Returns whether a frame was drawn.
    pub fn redraw_now(&mut self) -> Result<bool> {
        let Some(ticket) = self.begin_redraw()? else {
            return Ok(false);
        };
        let result = self.storage.query(&ticket.query);
        self.complete_redraw(ticket, result)?;
        Ok(true)
    }

    /// Release the renderer. Later draws fail and stall the controller.
    pub fn dispose(&mut self) {
        self.renderer.dispose();
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn length(&self) -> u64 {
        self.storage.length()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn style(&self) -> &Style {
        &self.style
    }

    pub fn state(&self) -> RedrawState {
        self.state
    }

    /// The dirty flag: set from a trigger until its redraw completes.
    pub fn is_dirty(&self) -> bool {
        self.state != RedrawState::Idle
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Viewport;
    use crate::error::Error;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        frames: Vec<ReducedFrame>,
        viewports: Vec<Viewport>,
        scrolls: bool,
        fail: bool,
    }

    impl Renderer for Recorder {
        fn draw(&mut self, frame: &ReducedFrame, _style: &Style) -> Result<()> {
            if self.fail {
                return Err(Error::Render("surface lost".to_string()));
            }
            self.frames.push(frame.clone());
            Ok(())
        }

        fn resize(&mut self, viewport: Viewport) -> Result<()> {
            self.viewports.push(viewport);
            Ok(())
        }

        fn dispose(&mut self) {
            self.fail = true;
        }

        fn supports_shift(&self) -> bool {
            self.scrolls
        }
    }

    struct Events(Arc<Mutex<Vec<String>>>);

    impl WaveformObserver for Events {
        fn on_push(&mut self, samples: &[f32], length: u64) {
            self.0.lock().unwrap().push(format!("push {} -> {}", samples.len(), length));
        }

        fn on_set(&mut self, length: u64) {
            self.0.lock().unwrap().push(format!("set {}", length));
        }

        fn on_update(&mut self, options: &Options) {
            self.0.lock().unwrap().push(format!("update {}", options.scale));
        }

        fn on_redraw(&mut self, frame: &ReducedFrame) {
            self.0.lock().unwrap().push(format!("redraw {}", frame.len()));
        }

        fn on_render(&mut self) {
            self.0.lock().unwrap().push("render".to_string());
        }
    }

    fn options(width: u32, scale: f64) -> Options {
        Options {
            buffer_size: 64,
            scale,
            viewport: Viewport::new(0, 0, width, 4),
            ..Options::default()
        }
    }

    fn waveform(width: u32, scale: f64) -> Waveform<Recorder> {
        Waveform::new(options(width, scale), Recorder::default()).unwrap()
    }

    #[test]
    fn construction_validates_and_sizes_renderer() {
        let w = waveform(8, 1.0);
        assert_eq!(w.renderer().viewports, vec![Viewport::new(0, 0, 8, 4)]);
        assert_eq!(w.state(), RedrawState::Idle);

        let bad = Options {
            scale: -1.0,
            ..Options::default()
        };
        assert_eq!(
            Waveform::new(bad, Recorder::default()).err(),
            Some(Error::InvalidScale(-1.0))
        );
    }

    #[test]
    fn push_then_redraw_draws_full_frame() {
        let mut w = waveform(8, 1.0);
        w.push(&[0.5; 8]);
        assert_eq!(w.state(), RedrawState::Pending);
        assert!(w.is_dirty());

        assert!(w.redraw_now().unwrap());
        assert_eq!(w.state(), RedrawState::Idle);
        assert_eq!(w.renderer().frames[0].tops, vec![0.5; 8]);
        assert_eq!(w.renderer().frames[0].tail, None);
        assert!(!w.redraw_now().unwrap());
    }

    #[test]
    fn pushes_coalesce_into_one_query() {
        let mut w = waveform(4, 1.0);
        w.push(&[0.25, 0.25]);
        assert!(!w.request_redraw());
        w.push(&[0.75, 0.75]);

        let ticket = w.begin_redraw().unwrap().unwrap();
        assert_eq!(w.begin_redraw().unwrap(), None);

        let frame = w.storage().query(&ticket.query).unwrap();
        assert_eq!(frame.tops, vec![0.25, 0.25, 0.75, 0.75]);
        w.complete_redraw(ticket, Ok(frame)).unwrap();
        assert_eq!(w.renderer().frames.len(), 1);
        assert_eq!(w.state(), RedrawState::Idle);
    }

    #[test]
    fn trigger_during_render_schedules_one_follow_up() {
        let mut w = waveform(4, 1.0);
        w.push(&[0.1; 4]);
        let ticket = w.begin_redraw().unwrap().unwrap();
        w.push(&[0.9]);
        w.push(&[0.9]);
        assert_eq!(w.state(), RedrawState::Rendering);

        let frame = w.storage().query(&ticket.query).unwrap();
        w.complete_redraw(ticket, Ok(frame)).unwrap();
        assert_eq!(w.state(), RedrawState::Pending);

        assert!(w.redraw_now().unwrap());
        assert_eq!(w.renderer().frames[1].tops, vec![0.1, 0.1, 0.9, 0.9]);
        assert_eq!(w.state(), RedrawState::Idle);
    }

    #[test]
    fn failed_query_stalls_until_next_trigger() {
        let mut w = waveform(4, 1.0);
        w.push(&[0.5; 4]);
        let ticket = w.begin_redraw().unwrap().unwrap();
        let err = w
            .complete_redraw(ticket, Err(Error::Render("worker gone".to_string())))
            .unwrap_err();
        assert_eq!(err, Error::Render("worker gone".to_string()));
        assert_eq!(w.state(), RedrawState::Stalled);
        assert!(w.is_dirty());
        assert!(w.renderer().frames.is_empty());

        assert!(!w.redraw_now().unwrap());
        w.push(&[0.5]);
        assert!(w.redraw_now().unwrap());
        assert_eq!(w.renderer().frames.len(), 1);
    }

    #[test]
    fn failed_draw_is_surfaced_and_stalls() {
        let mut w = waveform(4, 1.0);
        w.renderer_mut().fail = true;
        w.push(&[0.5; 4]);
        assert_eq!(w.redraw_now(), Err(Error::Render("surface lost".to_string())));
        assert_eq!(w.state(), RedrawState::Stalled);

        w.renderer_mut().fail = false;
        w.push(&[0.5]);
        assert!(w.redraw_now().unwrap());
    }

    #[test]
    fn invalid_update_changes_nothing() {
        let mut w = waveform(4, 1.0);
        let before = w.options().clone();
        let patch = OptionsPatch {
            scale: Some(0.0),
            log: Some(true),
            ..OptionsPatch::default()
        };
        assert_eq!(w.update(&patch), Err(Error::InvalidScale(0.0)));
        assert_eq!(w.options(), &before);
        assert_eq!(w.state(), RedrawState::Idle);

        let palette = OptionsPatch {
            active: Some(Some("not a color".to_string())),
            ..OptionsPatch::default()
        };
        assert!(matches!(w.update(&palette), Err(Error::InvalidPalette(_))));
        assert_eq!(w.options(), &before);
    }

    #[test]
    fn update_resizes_and_redraws() {
        let mut w = waveform(4, 1.0);
        w.push(&[0.5; 8]);
        w.redraw_now().unwrap();

        let patch = OptionsPatch {
            viewport: Some(Viewport::new(0, 0, 8, 4)),
            scale: Some(0.5),
            ..OptionsPatch::default()
        };
        w.update(&patch).unwrap();
        assert_eq!(w.state(), RedrawState::Pending);
        assert_eq!(w.renderer().viewports.last(), Some(&Viewport::new(0, 0, 8, 4)));
        assert_eq!(w.style().scale, 0.5);

        w.redraw_now().unwrap();
        assert_eq!(w.renderer().frames[1].len(), 8);
    }

    #[test]
    fn observers_see_typed_events_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut w = waveform(4, 1.0);
        w.add_observer(Events(log.clone()));

        w.push(&[0.1, 0.2]);
        w.redraw_now().unwrap();
        w.update(&OptionsPatch {
            scale: Some(2.0),
            ..OptionsPatch::default()
        })
        .unwrap();
        w.set(&[0.3; 3]);
        w.redraw_now().unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "push 2 -> 2",
                "redraw 4",
                "render",
                "update 2",
                "set 3",
                "redraw 4",
                "render",
            ]
        );
    }

    #[test]
    fn tail_tracking_scrolls_by_whole_columns() {
        let mut w = waveform(8, 2.0);
        w.renderer_mut().scrolls = true;
        w.push(&[0.5; 16]);
        w.redraw_now().unwrap();
        assert_eq!(w.renderer().frames[0].tail, None);

        w.push(&[1.0; 4]);
        w.redraw_now().unwrap();
        let shifted = &w.renderer().frames[1];
        assert_eq!(shifted.tail, Some(2));
        assert_eq!(shifted.start, 16.0);
        assert_eq!(shifted.tops, vec![1.0, 1.0]);

        // Half a column is not enough to scroll.
        w.push(&[0.0]);
        assert!(!w.redraw_now().unwrap());
        assert_eq!(w.state(), RedrawState::Idle);

        w.push(&[0.0]);
        w.redraw_now().unwrap();
        let shifted = &w.renderer().frames[2];
        assert_eq!(shifted.tail, Some(1));
        assert_eq!(shifted.start, 20.0);
    }

    #[test]
    fn option_changes_and_large_jumps_force_full_frames() {
        let mut w = waveform(4, 1.0);
        w.renderer_mut().scrolls = true;
        w.push(&[0.5; 4]);
        w.redraw_now().unwrap();

        w.push(&[0.5; 4]);
        w.redraw_now().unwrap();
        assert_eq!(w.renderer().frames[1].tail, None);

        w.update(&OptionsPatch {
            log: Some(true),
            ..OptionsPatch::default()
        })
        .unwrap();
        w.push(&[0.5]);
        w.redraw_now().unwrap();
        assert_eq!(w.renderer().frames[2].tail, None);

        w.update(&OptionsPatch {
            offset: Some(Some(0)),
            ..OptionsPatch::default()
        })
        .unwrap();
        w.redraw_now().unwrap();
        w.push(&[0.5]);
        w.redraw_now().unwrap();
        assert_eq!(w.renderer().frames[4].tail, None);
    }

    #[test]
    fn set_starts_a_new_stream() {
        let mut w = waveform(4, 1.0);
        w.renderer_mut().scrolls = true;
        w.push(&[0.5; 10]);
        w.redraw_now().unwrap();

        w.set(&[0.25; 3]);
        assert_eq!(w.length(), 3);
        w.redraw_now().unwrap();
        let frame = &w.renderer().frames[1];
        assert_eq!(frame.tail, None);
        assert_eq!(frame.tops, vec![0.0, 0.25, 0.25, 0.25]);
    }

    #[test]
    fn dispose_makes_later_draws_fail() {
        let mut w = waveform(4, 1.0);
        w.dispose();
        w.push(&[0.5]);
        assert!(w.redraw_now().is_err());
        assert_eq!(w.state(), RedrawState::Stalled);
    }
}
