use std::collections::VecDeque;
use std::f32::consts::TAU;
use std::io::{self, Write};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossterm::{
    cursor,
    event::{
        self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEventKind, KeyModifiers,
    },
    execute, queue,
    style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, BeginSynchronizedUpdate, DisableLineWrap, EnableLineWrap, EndSynchronizedUpdate,
        EnterAlternateScreen, LeaveAlternateScreen,
    },
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use unicode_width::UnicodeWidthChar;

type CrosstermResult<T> = io::Result<T>;

// Speed estimation
const SPEED_WINDOW_MS: u64 = 2000;
const CHARS_PER_WORD: f32 = 5.0;
const INTENSITY_MIN: f32 = 0.2;
const INTENSITY_MAX: f32 = 2.5;

// Particles
const PARTICLE_BASE_MS: u64 = 700;
const MAX_PARTICLES: usize = 15;
const IDLE_GAP_MS: u64 = 1500;
const RISE_SHIFT_CELLS: f32 = 2.0;

// Glyph ramps per spawn category. All entries are single-column glyphs so the
// diff renderer's dirty runs stay exact.
const TYPING_GLYPHS: &[char] = &['*', '+', '✦', '✧', '•', '◦'];
const SPACE_GLYPHS: &[char] = &['°', '˚', '∘'];
const DELETE_GLYPHS: &[char] = &['×', '‹', '›'];
const IDLE_GLYPHS: &[char] = &['z', 'Z', '…'];
const FADE_RAMP: &[char] = &['∙', '·', '˙'];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Rgb {
    r: u8,
    g: u8,
    b: u8,
}

#[derive(Clone, Copy)]
struct Theme {
    name: &'static str,
    bg: Rgb,
    ink: Rgb,
    dim: Rgb,
    frame: Rgb,
    caret: Rgb,
    spark: Rgb,
    glow: Rgb,
    ember: Rgb,
}

fn theme_by_name(name: &str) -> Theme {
    match name {
        "amber" => Theme {
            name: "amber",
            bg: Rgb { r: 8, g: 6, b: 3 },
            ink: Rgb { r: 235, g: 210, b: 170 },
            dim: Rgb { r: 120, g: 100, b: 70 },
            frame: Rgb { r: 150, g: 115, b: 60 },
            caret: Rgb { r: 255, g: 190, b: 90 },
            spark: Rgb { r: 255, g: 170, b: 60 },
            glow: Rgb { r: 255, g: 220, b: 130 },
            ember: Rgb { r: 235, g: 95, b: 55 },
        },
        "ice" => Theme {
            name: "ice",
            bg: Rgb { r: 5, g: 7, b: 11 },
            ink: Rgb { r: 190, g: 222, b: 245 },
            dim: Rgb { r: 80, g: 105, b: 130 },
            frame: Rgb { r: 70, g: 115, b: 165 },
            caret: Rgb { r: 150, g: 210, b: 255 },
            spark: Rgb { r: 120, g: 185, b: 255 },
            glow: Rgb { r: 210, g: 240, b: 255 },
            ember: Rgb { r: 170, g: 130, b: 255 },
        },
        "purple" => Theme {
            name: "purple",
            bg: Rgb { r: 10, g: 5, b: 15 },
            ink: Rgb { r: 220, g: 190, b: 250 },
            dim: Rgb { r: 110, g: 85, b: 145 },
            frame: Rgb { r: 130, g: 80, b: 180 },
            caret: Rgb { r: 215, g: 140, b: 255 },
            spark: Rgb { r: 190, g: 100, b: 255 },
            glow: Rgb { r: 245, g: 200, b: 255 },
            ember: Rgb { r: 255, g: 110, b: 170 },
        },
        "mono" => Theme {
            name: "mono",
            bg: Rgb { r: 6, g: 6, b: 8 },
            ink: Rgb { r: 230, g: 230, b: 232 },
            dim: Rgb { r: 105, g: 105, b: 112 },
            frame: Rgb { r: 140, g: 140, b: 148 },
            caret: Rgb { r: 255, g: 255, b: 255 },
            spark: Rgb { r: 245, g: 245, b: 245 },
            glow: Rgb { r: 255, g: 255, b: 255 },
            ember: Rgb { r: 180, g: 180, b: 188 },
        },
        _ => Theme {
            name: "mint",
            bg: Rgb { r: 5, g: 8, b: 10 },
            ink: Rgb { r: 185, g: 240, b: 215 },
            dim: Rgb { r: 75, g: 115, b: 100 },
            frame: Rgb { r: 60, g: 140, b: 115 },
            caret: Rgb { r: 130, g: 255, b: 205 },
            spark: Rgb { r: 110, g: 235, b: 185 },
            glow: Rgb { r: 215, g: 255, b: 235 },
            ember: Rgb { r: 255, g: 150, b: 110 },
        },
    }
}

fn cycle_theme(cur: Theme) -> Theme {
    let order = ["mint", "amber", "ice", "purple", "mono"];
    let mut idx = 0usize;
    for (i, &n) in order.iter().enumerate() {
        if n == cur.name {
            idx = i;
            break;
        }
    }
    theme_by_name(order[(idx + 1) % order.len()])
}

fn clamp01(x: f32) -> f32 {
    x.max(0.0).min(1.0)
}

fn mix(a: Rgb, b: Rgb, t: f32) -> Rgb {
    let t = clamp01(t);
    let u = 1.0 - t;
    Rgb {
        r: (a.r as f32 * u + b.r as f32 * t) as u8,
        g: (a.g as f32 * u + b.g as f32 * t) as u8,
        b: (a.b as f32 * u + b.b as f32 * t) as u8,
    }
}

// ---------------------------------------------------------------------------
// Text layout
//
// One wrapping routine serves both rendering and caret measurement, so the
// "mirror" can never drift from what is actually on screen.
// ---------------------------------------------------------------------------

fn glyph_width(ch: char) -> usize {
    if ch == '\n' {
        0
    } else {
        UnicodeWidthChar::width(ch).unwrap_or(0)
    }
}

// One visual row: half-open char range, terminating '\n' excluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Row {
    start: usize,
    end: usize,
}

/// Word-wrap `buf` to `width` columns. Hard break on '\n'; soft break at the
/// last space on the row when one exists, else mid-word. A space that lands
/// exactly on the edge hangs past it rather than forcing a wrap, so wrapped
/// text never opens a row with a stray space.
fn wrap_rows(buf: &[char], width: usize) -> Vec<Row> {
    let width = width.max(1);
    let mut rows = Vec::new();
    let mut start = 0usize;
    let mut col = 0usize;
    let mut break_at: Option<usize> = None;

    for (i, &ch) in buf.iter().enumerate() {
        if ch == '\n' {
            rows.push(Row { start, end: i });
            start = i + 1;
            col = 0;
            break_at = None;
            continue;
        }
        let w = glyph_width(ch);
        if col + w > width && col > 0 && ch != ' ' {
            let cut = match break_at {
                Some(b) if b > start => b,
                _ => i,
            };
            rows.push(Row { start, end: cut });
            start = cut;
            break_at = None;
            col = buf[start..i].iter().map(|&c| glyph_width(c)).sum();
        }
        col += w;
        if ch == ' ' {
            break_at = Some(i + 1);
        }
    }
    rows.push(Row {
        start,
        end: buf.len(),
    });
    rows
}

/// Cell position of a caret offset: column within its row (clamped to the
/// last visible column) and row index.
fn caret_cell(buf: &[char], rows: &[Row], caret: usize, width: usize) -> (usize, usize) {
    let mut row_ix = 0usize;
    for (i, r) in rows.iter().enumerate() {
        if r.start <= caret {
            row_ix = i;
        } else {
            break;
        }
    }
    let r = rows[row_ix];
    let upto = caret.clamp(r.start, r.end);
    let x: usize = buf[r.start..upto].iter().map(|&c| glyph_width(c)).sum();
    (x.min(width.saturating_sub(1)), row_ix)
}

/// Char index inside `row` closest to display column `col` (for vertical
/// caret movement).
fn index_at_column(buf: &[char], row: Row, col: usize) -> usize {
    let mut x = 0usize;
    for i in row.start..row.end {
        if x >= col {
            return i;
        }
        x += glyph_width(buf[i]);
    }
    row.end
}

// ---------------------------------------------------------------------------
// Speed estimation
// ---------------------------------------------------------------------------

/// Rolling window of insertion timestamps (ms). Deletions never record here;
/// they would push the readout up while the text shrinks.
struct SpeedWindow {
    stamps: VecDeque<u64>,
    window_ms: u64,
}

impl SpeedWindow {
    fn new(window_ms: u64) -> Self {
        Self {
            stamps: VecDeque::new(),
            window_ms,
        }
    }

    fn record(&mut self, now_ms: u64) {
        self.stamps.push_back(now_ms);
        self.prune(now_ms);
    }

    fn prune(&mut self, now_ms: u64) {
        while let Some(&t) = self.stamps.front() {
            if now_ms.saturating_sub(t) > self.window_ms {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self) -> usize {
        self.stamps.len()
    }

    fn wpm(&mut self, now_ms: u64) -> u32 {
        self.prune(now_ms);
        let minutes = self.window_ms as f32 / 60_000.0;
        ((self.stamps.len() as f32 / CHARS_PER_WORD) / minutes).round() as u32
    }

    /// Animation intensity: linear in window occupancy, clamped.
    fn intensity(&self) -> f32 {
        (1.0 + self.count() as f32 / 10.0).clamp(INTENSITY_MIN, INTENSITY_MAX)
    }

    fn reset(&mut self) {
        self.stamps.clear();
    }
}

// ---------------------------------------------------------------------------
// Particles
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SpawnKind {
    Typing,
    Space,
    Deletion,
    Idle,
}

impl SpawnKind {
    fn glyphs(self) -> &'static [char] {
        match self {
            SpawnKind::Typing => TYPING_GLYPHS,
            SpawnKind::Space => SPACE_GLYPHS,
            SpawnKind::Deletion => DELETE_GLYPHS,
            SpawnKind::Idle => IDLE_GLYPHS,
        }
    }
}

/// Motion parameters rolled once at spawn and never re-randomized.
#[derive(Clone, Copy)]
struct AnimParams {
    vx: f32,
    rise: f32,
    wobble_amp: f32,
    wobble_hz: f32,
    phase: f32,
}

#[derive(Clone)]
struct Particle {
    id: u64,
    kind: SpawnKind,
    glyph: char,
    x: f32,
    y: f32,
    intensity: f32,
    born_ms: u64,
    life_ms: u64,
    anim: AnimParams,
}

impl Particle {
    fn age01(&self, now_ms: u64) -> f32 {
        clamp01(now_ms.saturating_sub(self.born_ms) as f32 / self.life_ms.max(1) as f32)
    }

    // pure function of frozen state
    fn frame(&self, now_ms: u64) -> (i32, i32, char, f32) {
        let t = now_ms.saturating_sub(self.born_ms) as f32 / 1000.0;
        let a = self.age01(now_ms);
        let x = self.x
            + self.anim.vx * t
            + (self.anim.phase + t * self.anim.wobble_hz * TAU).sin() * self.anim.wobble_amp;
        let y = self.y - self.anim.rise * t;
        let ch = if a < 0.55 {
            self.glyph
        } else {
            let k = ((a - 0.55) / 0.45 * FADE_RAMP.len() as f32) as usize;
            FADE_RAMP[k.min(FADE_RAMP.len() - 1)]
        };
        (x.round() as i32, y.round() as i32, ch, a)
    }
}

fn particle_life_ms(intensity: f32) -> u64 {
    (PARTICLE_BASE_MS as f32 / intensity.max(0.5)) as u64
}

/// Insertion-ordered live set with a hard cap: exceeding it drops the oldest
/// immediately, which also cancels that particle's pending expiry.
struct ParticleField {
    live: VecDeque<Particle>,
    max: usize,
    next_id: u64,
}

impl ParticleField {
    fn new(max: usize) -> Self {
        Self {
            live: VecDeque::new(),
            max: max.max(1),
            next_id: 0,
        }
    }

    fn spawn(
        &mut self,
        kind: SpawnKind,
        glyph: char,
        x: f32,
        y: f32,
        intensity: f32,
        born_ms: u64,
        anim: AnimParams,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.live.push_back(Particle {
            id,
            kind,
            glyph,
            x,
            y,
            intensity,
            born_ms,
            life_ms: particle_life_ms(intensity),
            anim,
        });
        while self.live.len() > self.max {
            self.live.pop_front();
        }
        id
    }

    fn expire(&mut self, now_ms: u64) {
        self.live
            .retain(|p| now_ms.saturating_sub(p.born_ms) < p.life_ms);
    }

    fn len(&self) -> usize {
        self.live.len()
    }

    fn clear(&mut self) {
        self.live.clear();
    }
}

// ---------------------------------------------------------------------------
// Idle trigger
// ---------------------------------------------------------------------------

/// Single re-armable deadline. Each arm captures the current generation;
/// clear/reset bumps it, so a deadline armed before a reset fires inert.
struct IdleGate {
    deadline: Option<(u64, u64)>,
    generation: u64,
}

impl IdleGate {
    fn new() -> Self {
        Self {
            deadline: None,
            generation: 0,
        }
    }

    fn arm(&mut self, now_ms: u64) {
        self.deadline = Some((now_ms + IDLE_GAP_MS, self.generation));
    }

    fn invalidate(&mut self) {
        self.generation += 1;
        self.deadline = None;
    }

    // fires at most once per arm
    fn due(&mut self, now_ms: u64) -> bool {
        if let Some((at, gen)) = self.deadline {
            if now_ms >= at {
                self.deadline = None;
                return gen == self.generation;
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// App: the input surface and everything it owns. Clock comes in as plain
// millisecond timestamps so this whole struct runs without a terminal.
// ---------------------------------------------------------------------------

struct App {
    buf: Vec<char>,
    caret: usize,
    scroll: usize,
    inner_w: usize,
    inner_h: usize,
    focused: bool,
    wpm: u32,
    speed: SpeedWindow,
    field: ParticleField,
    idle: IdleGate,
    last_caret: (f32, f32),
    rng: StdRng,
}

impl App {
    fn new(window_ms: u64, max_particles: usize, seed: u64) -> Self {
        Self {
            buf: Vec::new(),
            caret: 0,
            scroll: 0,
            inner_w: 0,
            inner_h: 0,
            focused: true,
            wpm: 0,
            speed: SpeedWindow::new(window_ms),
            field: ParticleField::new(max_particles),
            idle: IdleGate::new(),
            last_caret: (0.0, 0.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn resize(&mut self, inner_w: usize, inner_h: usize) {
        self.inner_w = inner_w;
        self.inner_h = inner_h;
        self.scroll_to_caret();
        self.measure_caret();
    }

    fn char_count(&self) -> usize {
        self.buf.len()
    }

    fn rows(&self) -> Vec<Row> {
        wrap_rows(&self.buf, self.inner_w)
    }

    fn scroll_to_caret(&mut self) {
        if self.inner_w == 0 || self.inner_h == 0 {
            return;
        }
        let rows = self.rows();
        let (_, cy) = caret_cell(&self.buf, &rows, self.caret, self.inner_w);
        if cy < self.scroll {
            self.scroll = cy;
        } else if cy >= self.scroll + self.inner_h {
            self.scroll = cy + 1 - self.inner_h;
        }
        let max_scroll = rows.len().saturating_sub(self.inner_h);
        self.scroll = self.scroll.min(max_scroll);
    }

    /// Caret position in surface coordinates (columns/rows inside the visible
    /// text area). Falls back to the last good pair when geometry is
    /// degenerate; never fails.
    fn measure_caret(&mut self) -> (f32, f32) {
        if self.inner_w == 0 || self.inner_h == 0 {
            return self.last_caret;
        }
        let rows = self.rows();
        let (cx, cy) = caret_cell(&self.buf, &rows, self.caret, self.inner_w);
        let vy = cy.saturating_sub(self.scroll).min(self.inner_h - 1);
        self.last_caret = (cx as f32, vy as f32);
        self.last_caret
    }

    // One accepted insertion: mutate, record cadence, re-measure, then
    // spawn, in that order, so the particle reflects this keystroke.
    fn insert_char(&mut self, ch: char, now_ms: u64) {
        self.buf.insert(self.caret, ch);
        self.caret += 1;
        self.speed.record(now_ms);
        self.wpm = self.speed.wpm(now_ms);
        self.scroll_to_caret();
        self.measure_caret();
        let kind = if ch == ' ' {
            SpawnKind::Space
        } else {
            SpawnKind::Typing
        };
        self.spawn(kind, now_ms);
        self.idle.arm(now_ms);
    }

    /// Backspace: distinct effect category, no speed-window record.
    fn backspace(&mut self, now_ms: u64) {
        if self.caret == 0 {
            return;
        }
        self.caret -= 1;
        self.buf.remove(self.caret);
        self.scroll_to_caret();
        self.measure_caret();
        self.spawn(SpawnKind::Deletion, now_ms);
        self.idle.arm(now_ms);
    }

    fn move_left(&mut self) {
        self.caret = self.caret.saturating_sub(1);
        self.after_motion();
    }

    fn move_right(&mut self) {
        self.caret = (self.caret + 1).min(self.buf.len());
        self.after_motion();
    }

    fn move_up(&mut self) {
        let rows = self.rows();
        let (cx, cy) = caret_cell(&self.buf, &rows, self.caret, self.inner_w);
        if cy > 0 {
            self.caret = index_at_column(&self.buf, rows[cy - 1], cx);
        }
        self.after_motion();
    }

    fn move_down(&mut self) {
        let rows = self.rows();
        let (cx, cy) = caret_cell(&self.buf, &rows, self.caret, self.inner_w);
        if cy + 1 < rows.len() {
            self.caret = index_at_column(&self.buf, rows[cy + 1], cx);
        }
        self.after_motion();
    }

    fn move_home(&mut self) {
        let rows = self.rows();
        let (_, cy) = caret_cell(&self.buf, &rows, self.caret, self.inner_w);
        self.caret = rows[cy].start;
        self.after_motion();
    }

    fn move_end(&mut self) {
        let rows = self.rows();
        let (_, cy) = caret_cell(&self.buf, &rows, self.caret, self.inner_w);
        self.caret = rows[cy].end;
        self.after_motion();
    }

    fn after_motion(&mut self) {
        self.scroll_to_caret();
        self.measure_caret();
    }

    fn spawn(&mut self, kind: SpawnKind, now_ms: u64) {
        if !self.focused || self.inner_w == 0 || self.inner_h == 0 {
            return;
        }
        let intensity = self.speed.intensity();
        let (mut x, mut y) = self.last_caret;
        x += (self.rng.gen::<f32>() - 0.5) * 4.0;
        y += (self.rng.gen::<f32>() - 0.5) * 2.0 - 0.5;
        // Particles rise; on the lower half start them above the caret so the
        // insertion point stays readable.
        if y > self.inner_h as f32 * 0.5 {
            y -= RISE_SHIFT_CELLS;
        }
        x = x.clamp(0.0, (self.inner_w - 1) as f32);
        y = y.clamp(0.0, (self.inner_h - 1) as f32);

        let glyphs = kind.glyphs();
        let glyph = glyphs[self.rng.gen_range(0..glyphs.len())];
        let anim = AnimParams {
            vx: (self.rng.gen::<f32>() - 0.5) * 3.0 * (1.0 + intensity * 0.5),
            rise: 1.2 + intensity * 1.4,
            wobble_amp: self.rng.gen::<f32>() * 0.8 * (1.0 + intensity * 0.3),
            wobble_hz: 1.0 + self.rng.gen::<f32>() * 1.5,
            phase: self.rng.gen::<f32>() * TAU,
        };
        self.field.spawn(kind, glyph, x, y, intensity, now_ms, anim);
    }

    /// Per-frame housekeeping: decay the readout, cull expired particles,
    /// and fire the idle deadline if it is still valid.
    fn tick(&mut self, now_ms: u64) {
        self.wpm = self.speed.wpm(now_ms);
        self.field.expire(now_ms);
        if self.idle.due(now_ms) && self.focused && !self.buf.is_empty() {
            self.measure_caret();
            self.spawn(SpawnKind::Idle, now_ms);
        }
    }

    /// Atomic reset of text, caret, particles, and speed state.
    fn clear(&mut self) {
        self.buf.clear();
        self.caret = 0;
        self.scroll = 0;
        self.field.clear();
        self.speed.reset();
        self.wpm = 0;
        self.idle.invalidate();
        self.last_caret = (0.0, 0.0);
    }

    fn set_focused(&mut self, focused: bool) {
        self.focused = focused;
    }
}

// ---------------------------------------------------------------------------
// Renderer: double-buffered cell grid, flushed as dirty runs. Wide glyphs
// occupy a lead cell plus a '\0' continuation cell that is never printed.
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Cell {
    ch: char,
    fg: Rgb,
    bg: Rgb,
}

impl Cell {
    fn blank(bg: Rgb) -> Self {
        Self { ch: ' ', fg: bg, bg }
    }
}

struct Renderer {
    cols: u16,
    rows: u16,
    back: Vec<Cell>,
    front: Vec<Cell>,
}

impl Renderer {
    fn new(cols: u16, rows: u16, bg: Rgb) -> Self {
        let n = cols as usize * rows as usize;
        Self {
            cols,
            rows,
            back: vec![Cell::blank(bg); n],
            front: vec![Cell::blank(bg); n],
        }
    }

    fn resize(&mut self, cols: u16, rows: u16, bg: Rgb) {
        self.cols = cols;
        self.rows = rows;
        let n = cols as usize * rows as usize;
        self.back.resize(n, Cell::blank(bg));
        self.front.resize(n, Cell::blank(bg));
        self.back.fill(Cell::blank(bg));
        // Force a full repaint after resize.
        self.front.fill(Cell {
            ch: '\u{1}',
            fg: bg,
            bg,
        });
    }

    fn clear_back(&mut self, bg: Rgb) {
        self.back.fill(Cell::blank(bg));
    }

    fn set(&mut self, x: i32, y: i32, ch: char, fg: Rgb, bg: Rgb) {
        if x < 0 || y < 0 {
            return;
        }
        let (x, y) = (x as u16, y as u16);
        if x >= self.cols || y >= self.rows {
            return;
        }
        let i = y as usize * self.cols as usize + x as usize;
        // Clobbering either half of a wide glyph blanks the other half, so
        // the back buffer never claims two columns for one cell.
        if self.back[i].ch == '\u{0}' && x > 0 {
            self.back[i - 1].ch = ' ';
        }
        if UnicodeWidthChar::width(self.back[i].ch).unwrap_or(1) == 2
            && x + 1 < self.cols
            && self.back[i + 1].ch == '\u{0}'
        {
            self.back[i + 1].ch = ' ';
        }
        self.back[i] = Cell { ch, fg, bg };
    }

    /// Place a glyph honoring its display width; the cell to the right of a
    /// wide glyph becomes a continuation marker.
    fn set_glyph(&mut self, x: i32, y: i32, ch: char, fg: Rgb, bg: Rgb) {
        let w = UnicodeWidthChar::width(ch).unwrap_or(1).max(1);
        if w == 2 && x + 1 < self.cols as i32 {
            self.set(x, y, ch, fg, bg);
            self.set(x + 1, y, '\u{0}', fg, bg);
        } else {
            self.set(x, y, ch, fg, bg);
        }
    }

    fn flush<W: Write>(&mut self, out: &mut W) -> CrosstermResult<()> {
        queue!(out, BeginSynchronizedUpdate)?;
        let mut last_fg: Option<Rgb> = None;
        let mut last_bg: Option<Rgb> = None;

        let cols = self.cols as usize;
        let rows = self.rows as usize;

        for y in 0..rows {
            let mut x = 0usize;
            while x < cols {
                let i = y * cols + x;
                if self.back[i] == self.front[i] {
                    x += 1;
                    continue;
                }
                // A run opening on the right half of a wide glyph (in either
                // buffer) must reprint the lead cell too, or the cursor lands
                // mid-glyph and the stale half is never erased.
                let mut x0 = x;
                if x0 > 0 && (self.back[i].ch == '\u{0}' || self.front[i].ch == '\u{0}') {
                    x0 -= 1;
                }
                let mut x2 = x + 1;
                while x2 < cols {
                    let j = y * cols + x2;
                    if self.back[j] == self.front[j] {
                        break;
                    }
                    x2 += 1;
                }

                queue!(out, cursor::MoveTo(x0 as u16, y as u16))?;
                for xx in x0..x2 {
                    let k = y * cols + xx;
                    let c = self.back[k];
                    // Continuation cell of a wide glyph: the terminal cursor
                    // is already past it.
                    if c.ch == '\u{0}' {
                        continue;
                    }
                    if last_bg != Some(c.bg) {
                        queue!(
                            out,
                            SetBackgroundColor(Color::Rgb {
                                r: c.bg.r,
                                g: c.bg.g,
                                b: c.bg.b
                            })
                        )?;
                        last_bg = Some(c.bg);
                    }
                    if last_fg != Some(c.fg) {
                        queue!(
                            out,
                            SetForegroundColor(Color::Rgb {
                                r: c.fg.r,
                                g: c.fg.g,
                                b: c.fg.b
                            })
                        )?;
                        last_fg = Some(c.fg);
                    }
                    queue!(out, Print(c.ch))?;
                }

                self.front[(y * cols + x0)..(y * cols + x2)]
                    .copy_from_slice(&self.back[(y * cols + x0)..(y * cols + x2)]);
                x = x2;
            }
        }

        queue!(out, ResetColor, EndSynchronizedUpdate)?;
        out.flush()?;
        Ok(())
    }
}

fn draw_text(r: &mut Renderer, x: i32, y: i32, s: &str, fg: Rgb, bg: Rgb) {
    let mut col = x;
    for ch in s.chars() {
        r.set_glyph(col, y, ch, fg, bg);
        col += UnicodeWidthChar::width(ch).unwrap_or(1).max(1) as i32;
    }
}

// ---------------------------------------------------------------------------
// Box geometry: the textarea frame centered under the HUD line.
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Surface {
    x0: i32,
    y0: i32,
    w: usize,
    h: usize,
    inner_x: i32,
    inner_y: i32,
    inner_w: usize,
    inner_h: usize,
}

fn surface_for(cols: u16, rows: u16) -> Surface {
    let w = (cols as usize).saturating_sub(6).clamp(24, 100);
    let h = (rows as usize).saturating_sub(6).max(8);
    let x0 = ((cols as usize - w) / 2) as i32;
    let y0 = 2;
    Surface {
        x0,
        y0,
        w,
        h,
        inner_x: x0 + 2,
        inner_y: y0 + 1,
        inner_w: w.saturating_sub(4),
        inner_h: h.saturating_sub(2),
    }
}

fn draw_frame(r: &mut Renderer, s: Surface, theme: Theme) {
    let fg = theme.frame;
    let bg = theme.bg;
    let (x1, y1) = (s.x0 + s.w as i32 - 1, s.y0 + s.h as i32 - 1);
    r.set(s.x0, s.y0, '┌', fg, bg);
    r.set(x1, s.y0, '┐', fg, bg);
    r.set(s.x0, y1, '└', fg, bg);
    r.set(x1, y1, '┘', fg, bg);
    for x in (s.x0 + 1)..x1 {
        r.set(x, s.y0, '─', fg, bg);
        r.set(x, y1, '─', fg, bg);
    }
    for y in (s.y0 + 1)..y1 {
        r.set(s.x0, y, '│', fg, bg);
        r.set(x1, y, '│', fg, bg);
    }
}

fn draw_surface(r: &mut Renderer, s: Surface, app: &App, theme: Theme, now_ms: u64) {
    draw_frame(r, s, theme);

    if app.buf.is_empty() {
        draw_text(
            r,
            s.inner_x,
            s.inner_y,
            "start typing…",
            theme.dim,
            theme.bg,
        );
    }

    // Text, by visual row.
    let rows = app.rows();
    for (vr, row) in rows
        .iter()
        .skip(app.scroll)
        .take(app.inner_h)
        .enumerate()
    {
        let mut col = 0usize;
        for i in row.start..row.end {
            let ch = app.buf[i];
            let w = glyph_width(ch);
            if w == 0 || col + w > app.inner_w {
                // Hanging spaces and zero-width glyphs are not drawn.
                col += w;
                continue;
            }
            r.set_glyph(
                s.inner_x + col as i32,
                s.inner_y + vr as i32,
                ch,
                theme.ink,
                theme.bg,
            );
            col += w;
        }
    }

    // Caret block.
    if app.focused {
        let (cx, cy) = caret_cell(&app.buf, &rows, app.caret, app.inner_w.max(1));
        if cy >= app.scroll && cy < app.scroll + app.inner_h {
            let under = if app.caret < app.buf.len() {
                let ch = app.buf[app.caret];
                if ch == '\n' || glyph_width(ch) == 0 {
                    ' '
                } else {
                    ch
                }
            } else {
                ' '
            };
            r.set_glyph(
                s.inner_x + cx as i32,
                s.inner_y + (cy - app.scroll) as i32,
                under,
                theme.bg,
                theme.caret,
            );
        }
    }

    // Particle overlay, clipped to the inner area.
    for p in app.field.live.iter() {
        let (px, py, ch, a) = p.frame(now_ms);
        if px < 0 || py < 0 || px >= app.inner_w as i32 || py >= app.inner_h as i32 {
            continue;
        }
        let tint = match p.kind {
            SpawnKind::Typing => mix(theme.spark, theme.glow, clamp01(p.intensity / INTENSITY_MAX)),
            SpawnKind::Space => theme.glow,
            SpawnKind::Deletion => theme.ember,
            SpawnKind::Idle => theme.dim,
        };
        let fg = mix(tint, theme.bg, a * a * 0.85);
        r.set(s.inner_x + px, s.inner_y + py, ch, fg, theme.bg);
    }
}

fn draw_hud(r: &mut Renderer, app: &App, theme: Theme, fps: f32) {
    let line = format!(
        " typefetti  |  wpm {:>3}  chars {:>4}  sparks {:>2}  |  theme={}  |  {:.0} fps{}",
        app.wpm,
        app.char_count(),
        app.field.len(),
        theme.name,
        fps,
        if app.focused { "" } else { "  (unfocused)" }
    );
    draw_text(r, 1, 0, &line, mix(theme.ink, theme.glow, 0.25), theme.bg);
}

fn draw_hints(r: &mut Renderer, cols: u16, rows: u16, theme: Theme) {
    let hints = "ctrl+l clear   ctrl+t theme   ctrl+g help   esc quit";
    let x = ((cols as i32) - hints.len() as i32) / 2;
    draw_text(r, x.max(0), rows as i32 - 1, hints, theme.dim, theme.bg);
}

fn draw_help(r: &mut Renderer, s: Surface, theme: Theme) {
    let help = [
        "Keys:",
        "  type       spawn sparks at the caret",
        "  space      bubble sparks",
        "  backspace  ember sparks (not counted for wpm)",
        "  pause      a sleepy spark after 1.5s idle",
        "  arrows     move caret   home/end line ends",
        "  ctrl+l     clear text, sparks, and wpm",
        "  ctrl+t     cycle theme",
        "  ctrl+g     toggle this help",
        "  esc        quit",
        "",
        "Type faster and the sparks burn brighter and die younger.",
    ];
    let y0 = s.inner_y + 1;
    for (i, line) in help.iter().enumerate() {
        draw_text(
            r,
            s.inner_x + 1,
            y0 + i as i32,
            line,
            mix(theme.ink, theme.glow, 0.15),
            theme.bg,
        );
    }
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

struct Args {
    theme: String,
    fps: u32,
    max_particles: usize,
    window_ms: u64,
    seed: u64,
}

fn parse_args() -> Args {
    let mut out = Args {
        theme: "mint".to_string(),
        fps: 60,
        max_particles: MAX_PARTICLES,
        window_ms: SPEED_WINDOW_MS,
        seed: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0x7E1E_F311),
    };
    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--theme" => {
                if let Some(v) = it.next() {
                    out.theme = v;
                }
            }
            "--fps" => {
                if let Some(v) = it.next() {
                    out.fps = v.parse().unwrap_or(out.fps);
                }
            }
            "--max-particles" => {
                if let Some(v) = it.next() {
                    out.max_particles = v.parse().unwrap_or(out.max_particles);
                }
            }
            "--window-ms" => {
                if let Some(v) = it.next() {
                    out.window_ms = v.parse().unwrap_or(out.window_ms);
                }
            }
            "--seed" => {
                if let Some(v) = it.next() {
                    out.seed = v.parse().unwrap_or(out.seed);
                }
            }
            "--help" | "-h" => {
                println!(
                    "typefetti\n\
                     \n\
                     A textarea that throws sparks while you type.\n\
                     \n\
                     USAGE:\n\
                     \ttypefetti [--theme mint|amber|ice|purple|mono] [--fps 15..240]\n\
                     \t          [--max-particles 5..60] [--window-ms 500..10000] [--seed N]\n\
                     \n\
                     KEYS:\n\
                     \tEsc quit | Ctrl+L clear | Ctrl+T theme | Ctrl+G help\n"
                );
                std::process::exit(0);
            }
            _ => {}
        }
    }
    out.fps = out.fps.clamp(15, 240);
    out.max_particles = out.max_particles.clamp(5, 60);
    out.window_ms = out.window_ms.clamp(500, 10_000);
    out
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

fn main() -> CrosstermResult<()> {
    let args = parse_args();
    let mut theme = theme_by_name(&args.theme);

    let mut out = io::stdout();
    execute!(
        out,
        EnterAlternateScreen,
        cursor::Hide,
        DisableLineWrap,
        EnableFocusChange
    )?;
    terminal::enable_raw_mode()?;

    let (mut cols, mut rows) = terminal::size()?;
    cols = cols.max(40);
    rows = rows.max(12);

    let mut r = Renderer::new(cols, rows, theme.bg);
    let mut app = App::new(args.window_ms, args.max_particles, args.seed);
    let mut surf = surface_for(cols, rows);
    app.resize(surf.inner_w, surf.inner_h);

    let start = Instant::now();
    let frame = Duration::from_secs_f64(1.0 / args.fps as f64);
    let mut show_help = false;

    let mut fps_hist: VecDeque<f32> = VecDeque::new();
    let mut last = Instant::now();

    loop {
        let frame_started = Instant::now();
        let now_ms = start.elapsed().as_millis() as u64;

        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Resize(c, rr) => {
                    cols = c.max(40);
                    rows = rr.max(12);
                    r.resize(cols, rows, theme.bg);
                    surf = surface_for(cols, rows);
                    app.resize(surf.inner_w, surf.inner_h);
                }
                Event::FocusGained => app.set_focused(true),
                Event::FocusLost => app.set_focused(false),
                Event::Key(k)
                    if k.kind == KeyEventKind::Press || k.kind == KeyEventKind::Repeat =>
                {
                    let ctrl = k.modifiers.contains(KeyModifiers::CONTROL);
                    match k.code {
                        KeyCode::Esc => {
                            cleanup(&mut out)?;
                            return Ok(());
                        }
                        KeyCode::Char('c') if ctrl => {
                            cleanup(&mut out)?;
                            return Ok(());
                        }
                        KeyCode::Char('l') if ctrl => app.clear(),
                        KeyCode::Char('t') if ctrl => {
                            theme = cycle_theme(theme);
                        }
                        KeyCode::Char('g') if ctrl => show_help = !show_help,
                        KeyCode::Enter => app.insert_char('\n', now_ms),
                        KeyCode::Backspace => app.backspace(now_ms),
                        KeyCode::Left => app.move_left(),
                        KeyCode::Right => app.move_right(),
                        KeyCode::Up => app.move_up(),
                        KeyCode::Down => app.move_down(),
                        KeyCode::Home => app.move_home(),
                        KeyCode::End => app.move_end(),
                        KeyCode::Char(ch) if !ctrl => app.insert_char(ch, now_ms),
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        app.tick(now_ms);

        // FPS meter (visual only).
        let dt = last.elapsed().as_secs_f32();
        last = Instant::now();
        if dt > 0.0001 {
            fps_hist.push_back(1.0 / dt);
        }
        if fps_hist.len() > 24 {
            fps_hist.pop_front();
        }
        let fps = if fps_hist.is_empty() {
            args.fps as f32
        } else {
            fps_hist.iter().copied().sum::<f32>() / fps_hist.len() as f32
        };

        r.clear_back(theme.bg);
        draw_hud(&mut r, &app, theme, fps);
        if show_help {
            draw_frame(&mut r, surf, theme);
            draw_help(&mut r, surf, theme);
        } else {
            draw_surface(&mut r, surf, &app, theme, now_ms);
        }
        draw_hints(&mut r, cols, rows, theme);
        r.flush(&mut out)?;

        let spent = frame_started.elapsed();
        if spent < frame {
            std::thread::sleep(frame - spent);
        }
    }
}

fn cleanup(out: &mut io::Stdout) -> CrosstermResult<()> {
    terminal::disable_raw_mode()?;
    execute!(
        out,
        EndSynchronizedUpdate,
        ResetColor,
        DisableFocusChange,
        EnableLineWrap,
        cursor::Show,
        LeaveAlternateScreen
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn test_app() -> App {
        let mut app = App::new(SPEED_WINDOW_MS, MAX_PARTICLES, 7);
        app.resize(20, 6);
        app
    }

    // --- layout ---

    #[test]
    fn wrap_empty_buffer_is_one_empty_row() {
        let rows = wrap_rows(&[], 10);
        assert_eq!(rows, vec![Row { start: 0, end: 0 }]);
    }

    #[test]
    fn wrap_breaks_at_last_space() {
        let buf = chars("hello world");
        let rows = wrap_rows(&buf, 8);
        assert_eq!(rows.len(), 2);
        // "hello " with the hanging space, then "world"
        assert_eq!(rows[0], Row { start: 0, end: 6 });
        assert_eq!(rows[1], Row { start: 6, end: 11 });
    }

    #[test]
    fn wrap_hard_breaks_long_words() {
        let buf = chars("abcdefghij");
        let rows = wrap_rows(&buf, 4);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], Row { start: 0, end: 4 });
        assert_eq!(rows[1], Row { start: 4, end: 8 });
        assert_eq!(rows[2], Row { start: 8, end: 10 });
    }

    #[test]
    fn wrap_respects_newlines() {
        let buf = chars("ab\ncd\n");
        let rows = wrap_rows(&buf, 10);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], Row { start: 0, end: 2 });
        assert_eq!(rows[1], Row { start: 3, end: 5 });
        // Trailing newline opens an empty final row for the caret.
        assert_eq!(rows[2], Row { start: 6, end: 6 });
    }

    #[test]
    fn wrap_counts_wide_glyphs_as_two_columns() {
        let buf = chars("字字字");
        let rows = wrap_rows(&buf, 4);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], Row { start: 0, end: 2 });
        assert_eq!(rows[1], Row { start: 2, end: 3 });
    }

    #[test]
    fn caret_at_origin() {
        let buf = chars("");
        let rows = wrap_rows(&buf, 10);
        assert_eq!(caret_cell(&buf, &rows, 0, 10), (0, 0));
    }

    #[test]
    fn caret_advances_by_display_width() {
        let buf = chars("a字b");
        let rows = wrap_rows(&buf, 10);
        assert_eq!(caret_cell(&buf, &rows, 1, 10), (1, 0));
        assert_eq!(caret_cell(&buf, &rows, 2, 10), (3, 0));
        assert_eq!(caret_cell(&buf, &rows, 3, 10), (4, 0));
    }

    #[test]
    fn caret_at_wrap_boundary_moves_to_next_row() {
        let buf = chars("hello world");
        let rows = wrap_rows(&buf, 8);
        // Offset 6 is the start of "world": column 0 of row 1.
        assert_eq!(caret_cell(&buf, &rows, 6, 8), (0, 1));
    }

    #[test]
    fn caret_before_newline_stays_on_its_row() {
        let buf = chars("ab\ncd");
        let rows = wrap_rows(&buf, 10);
        assert_eq!(caret_cell(&buf, &rows, 2, 10), (2, 0));
        assert_eq!(caret_cell(&buf, &rows, 3, 10), (0, 1));
    }

    #[test]
    fn caret_in_bounds_for_every_offset() {
        let buf = chars("the quick brown fox\njumps over the lazy dog 字字字 end");
        let width = 9;
        let rows = wrap_rows(&buf, width);
        for off in 0..=buf.len() {
            let (x, y) = caret_cell(&buf, &rows, off, width);
            assert!(x < width, "x={} out of bounds at offset {}", x, off);
            assert!(y < rows.len(), "y={} out of bounds at offset {}", y, off);
        }
    }

    #[test]
    fn index_at_column_round_trips() {
        let buf = chars("hello world");
        let rows = wrap_rows(&buf, 8);
        assert_eq!(index_at_column(&buf, rows[0], 0), 0);
        assert_eq!(index_at_column(&buf, rows[0], 3), 3);
        // Past the row end clamps to the row end.
        assert_eq!(index_at_column(&buf, rows[1], 99), 11);
    }

    // --- speed window ---

    #[test]
    fn window_keeps_only_trailing_entries() {
        let mut w = SpeedWindow::new(2000);
        for t in [0u64, 400, 800, 1200, 1600] {
            w.record(t);
        }
        assert_eq!(w.count(), 5);
        w.record(2500);
        // 0 and 400 have aged out.
        assert_eq!(w.count(), 4);
        w.prune(10_000);
        assert_eq!(w.count(), 0);
    }

    #[test]
    fn wpm_grows_with_rate() {
        let mut slow = SpeedWindow::new(2000);
        let mut fast = SpeedWindow::new(2000);
        for i in 0..4u64 {
            slow.record(i * 500);
        }
        for i in 0..20u64 {
            fast.record(i * 100);
        }
        assert!(fast.wpm(2000) > slow.wpm(2000));
        assert!(slow.wpm(2000) > 0);
    }

    #[test]
    fn wpm_decays_as_entries_age_out() {
        let mut w = SpeedWindow::new(2000);
        for i in 0..10u64 {
            w.record(i * 100);
        }
        let burst = w.wpm(1000);
        let later = w.wpm(2500);
        assert!(later < burst);
        assert_eq!(w.wpm(5000), 0);
    }

    #[test]
    fn intensity_is_clamped_and_monotone() {
        let mut w = SpeedWindow::new(2000);
        let mut prev = w.intensity();
        assert!(prev >= INTENSITY_MIN);
        for t in 0..60u64 {
            w.record(t);
            let cur = w.intensity();
            assert!(cur >= prev);
            assert!((INTENSITY_MIN..=INTENSITY_MAX).contains(&cur));
            prev = cur;
        }
        assert_eq!(prev, INTENSITY_MAX);
    }

    // --- particle field ---

    fn still_anim() -> AnimParams {
        AnimParams {
            vx: 0.0,
            rise: 0.0,
            wobble_amp: 0.0,
            wobble_hz: 0.0,
            phase: 0.0,
        }
    }

    #[test]
    fn field_never_exceeds_bound_and_evicts_oldest() {
        let mut f = ParticleField::new(3);
        for i in 0..5u64 {
            f.spawn(SpawnKind::Typing, '*', 0.0, 0.0, 1.0, i, still_anim());
        }
        assert_eq!(f.len(), 3);
        let ids: Vec<u64> = f.live.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn lifetime_shrinks_with_intensity() {
        assert!(particle_life_ms(2.5) < particle_life_ms(1.0));
        assert!(particle_life_ms(1.0) <= particle_life_ms(0.2));
        // Lower bound on the divisor caps the slow-typing lifetime.
        assert_eq!(particle_life_ms(0.2), particle_life_ms(0.5));
    }

    #[test]
    fn expiry_culls_exactly_the_aged() {
        let mut f = ParticleField::new(10);
        f.spawn(SpawnKind::Typing, '*', 0.0, 0.0, 2.5, 0, still_anim()); // 280 ms
        f.spawn(SpawnKind::Typing, '*', 0.0, 0.0, 1.0, 0, still_anim()); // 700 ms
        f.expire(300);
        assert_eq!(f.len(), 1);
        assert_eq!(f.live[0].life_ms, 700);
        f.expire(700);
        assert_eq!(f.len(), 0);
    }

    #[test]
    fn frame_glyph_fades_late_in_life() {
        let mut f = ParticleField::new(4);
        f.spawn(SpawnKind::Typing, '✦', 5.0, 5.0, 1.0, 0, still_anim());
        let p = &f.live[0];
        let (_, _, young, _) = p.frame(100);
        assert_eq!(young, '✦');
        let (_, _, old, _) = p.frame(650);
        assert!(FADE_RAMP.contains(&old));
    }

    // --- renderer ---

    const TEST_BG: Rgb = Rgb { r: 0, g: 0, b: 0 };
    const TEST_FG: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };

    #[test]
    fn overwriting_half_a_wide_glyph_blanks_the_other_half() {
        let mut r = Renderer::new(6, 1, TEST_BG);
        r.set_glyph(0, 0, '字', TEST_FG, TEST_BG);
        r.set(1, 0, '*', TEST_FG, TEST_BG);
        assert_eq!(r.back[0].ch, ' ');
        assert_eq!(r.back[1].ch, '*');

        r.set_glyph(2, 0, '字', TEST_FG, TEST_BG);
        r.set(2, 0, 'a', TEST_FG, TEST_BG);
        assert_eq!(r.back[2].ch, 'a');
        assert_eq!(r.back[3].ch, ' ');
    }

    #[test]
    fn flush_reprints_wide_lead_when_run_starts_on_continuation() {
        let mut r = Renderer::new(6, 1, TEST_BG);
        r.set_glyph(0, 0, '字', TEST_FG, TEST_BG);
        let mut first = Vec::new();
        r.flush(&mut first).unwrap();

        // The terminal shows the wide glyph; a later overlay replaced only
        // its right half. The dirty run starts on the continuation cell and
        // must back up to reprint the lead.
        r.front[1] = Cell {
            ch: '*',
            fg: TEST_FG,
            bg: TEST_BG,
        };
        let mut second = Vec::new();
        r.flush(&mut second).unwrap();
        let printed = String::from_utf8(second).unwrap();
        assert!(printed.contains('字'));
        assert_eq!(r.front[0].ch, '字');
        assert_eq!(r.front[1].ch, '\u{0}');
    }

    #[test]
    fn overlay_on_wide_glyph_is_erased_on_the_next_frame() {
        let mut r = Renderer::new(8, 1, TEST_BG);
        r.set_glyph(0, 0, '字', TEST_FG, TEST_BG);
        let mut out = Vec::new();
        r.flush(&mut out).unwrap();

        // A particle lands on the glyph's right half.
        r.clear_back(TEST_BG);
        r.set_glyph(0, 0, '字', TEST_FG, TEST_BG);
        r.set(1, 0, '*', TEST_FG, TEST_BG);
        let mut out = Vec::new();
        r.flush(&mut out).unwrap();

        // Next frame the particle is gone; the glyph must be repainted
        // whole, not left with a stale '*' on screen.
        r.clear_back(TEST_BG);
        r.set_glyph(0, 0, '字', TEST_FG, TEST_BG);
        let mut out = Vec::new();
        r.flush(&mut out).unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains('字'));
        assert_eq!(r.front[0].ch, '字');
        assert_eq!(r.front[1].ch, '\u{0}');
        assert_eq!(r.back[0], r.front[0]);
    }

    // --- idle gate ---

    #[test]
    fn idle_gate_fires_once_after_gap() {
        let mut g = IdleGate::new();
        g.arm(0);
        assert!(!g.due(1000));
        assert!(g.due(IDLE_GAP_MS));
        assert!(!g.due(IDLE_GAP_MS + 1));
    }

    #[test]
    fn idle_gate_rearm_supersedes() {
        let mut g = IdleGate::new();
        g.arm(0);
        g.arm(1000);
        assert!(!g.due(IDLE_GAP_MS));
        assert!(g.due(1000 + IDLE_GAP_MS));
    }

    #[test]
    fn stale_idle_deadline_is_inert_after_invalidate() {
        let mut g = IdleGate::new();
        g.arm(0);
        g.invalidate();
        assert!(!g.due(IDLE_GAP_MS + 1));
        // And the next armed deadline works normally.
        g.arm(5000);
        assert!(g.due(5000 + IDLE_GAP_MS));
    }

    // --- app scenarios ---

    #[test]
    fn typing_hello_spawns_five_particles() {
        let mut app = test_app();
        for (i, ch) in "hello".chars().enumerate() {
            app.insert_char(ch, i as u64 * 80);
        }
        assert_eq!(app.char_count(), 5);
        assert_eq!(app.field.len(), 5);
        assert_eq!(app.speed.count(), 5);
        assert!(app.wpm > 0);
    }

    #[test]
    fn clear_resets_everything() {
        let mut app = test_app();
        for (i, ch) in "hello world".chars().enumerate() {
            app.insert_char(ch, i as u64 * 50);
        }
        app.clear();
        assert_eq!(app.char_count(), 0);
        assert_eq!(app.caret, 0);
        assert_eq!(app.field.len(), 0);
        assert_eq!(app.speed.count(), 0);
        assert_eq!(app.wpm, 0);
        assert_eq!(app.last_caret, (0.0, 0.0));
    }

    #[test]
    fn burst_then_clear_leaves_no_stragglers() {
        let mut app = test_app();
        for i in 0..20u64 {
            app.insert_char('x', i * 40);
        }
        app.clear();
        // Ticks long after the burst must not resurrect anything: not the
        // particle expiries, not the idle deadline.
        for t in [900u64, 2400, 5000] {
            app.tick(t);
            assert_eq!(app.field.len(), 0);
        }
    }

    #[test]
    fn backspace_spawns_but_does_not_count() {
        let mut app = test_app();
        for (i, ch) in "abc".chars().enumerate() {
            app.insert_char(ch, i as u64 * 50);
        }
        app.backspace(200);
        assert_eq!(app.char_count(), 2);
        assert_eq!(app.speed.count(), 3);
        assert_eq!(app.field.len(), 4);
        assert_eq!(app.field.live.back().unwrap().kind, SpawnKind::Deletion);
    }

    #[test]
    fn space_and_typing_use_their_palettes() {
        let mut app = test_app();
        app.insert_char('a', 0);
        app.insert_char(' ', 50);
        let kinds: Vec<SpawnKind> = app.field.live.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![SpawnKind::Typing, SpawnKind::Space]);
        assert!(TYPING_GLYPHS.contains(&app.field.live[0].glyph));
        assert!(SPACE_GLYPHS.contains(&app.field.live[1].glyph));
    }

    #[test]
    fn idle_particle_fires_only_while_focused_and_nonempty() {
        let mut app = test_app();
        app.insert_char('a', 0);
        app.field.clear();
        app.tick(IDLE_GAP_MS + 1);
        assert_eq!(app.field.len(), 1);
        assert_eq!(app.field.live[0].kind, SpawnKind::Idle);

        // Re-armed by the next keystroke, but inert without focus.
        app.insert_char('b', IDLE_GAP_MS + 100);
        app.field.clear();
        app.set_focused(false);
        app.tick(2 * IDLE_GAP_MS + 200);
        assert_eq!(app.field.len(), 0);
    }

    #[test]
    fn idle_deadline_from_before_clear_never_fires() {
        let mut app = test_app();
        app.insert_char('a', 0);
        app.clear();
        // Text typed into the fresh state should not inherit the old deadline.
        app.insert_char('b', 100);
        app.field.clear();
        app.tick(IDLE_GAP_MS + 1); // old deadline's moment
        assert_eq!(app.field.len(), 0);
        app.tick(100 + IDLE_GAP_MS);
        assert_eq!(app.field.len(), 1);
    }

    #[test]
    fn unfocused_keystroke_spawns_nothing() {
        let mut app = test_app();
        app.set_focused(false);
        app.insert_char('a', 0);
        assert_eq!(app.char_count(), 1);
        assert_eq!(app.field.len(), 0);
    }

    #[test]
    fn spawn_positions_stay_inside_the_surface() {
        let mut app = test_app();
        let text = "the quick brown fox jumps over the lazy dog and keeps going";
        for (i, ch) in text.chars().enumerate() {
            app.insert_char(ch, i as u64 * 30);
        }
        for p in app.field.live.iter() {
            assert!(p.x >= 0.0 && p.x <= (app.inner_w - 1) as f32);
            assert!(p.y >= 0.0 && p.y <= (app.inner_h - 1) as f32);
        }
    }

    #[test]
    fn caret_measurement_survives_degenerate_geometry() {
        let mut app = test_app();
        for (i, ch) in "hello".chars().enumerate() {
            app.insert_char(ch, i as u64 * 50);
        }
        let good = app.measure_caret();
        assert_eq!(good, (5.0, 0.0));
        app.inner_w = 0;
        assert_eq!(app.measure_caret(), good);
    }

    #[test]
    fn scroll_follows_caret_past_the_bottom() {
        let mut app = test_app(); // inner 20x6
        for i in 0..10u64 {
            app.insert_char('a', i * 10);
            app.insert_char('\n', i * 10 + 5);
        }
        let rows = app.rows();
        let (_, cy) = caret_cell(&app.buf, &rows, app.caret, app.inner_w);
        assert!(cy >= app.scroll);
        assert!(cy < app.scroll + app.inner_h);
        assert!(app.scroll > 0);
    }

    #[test]
    fn vertical_motion_keeps_column() {
        let mut app = test_app();
        for (i, ch) in "abcd\nefgh".chars().enumerate() {
            app.insert_char(ch, i as u64 * 10);
        }
        // Caret at end of "efgh"; up should land after "abcd".
        app.move_up();
        assert_eq!(app.caret, 4);
        app.move_down();
        assert_eq!(app.caret, 9);
    }

    #[test]
    fn anim_params_are_frozen_at_spawn() {
        let mut app = test_app();
        app.insert_char('a', 0);
        let p = app.field.live[0].clone();
        let first = p.frame(100);
        // Ticks in between must not re-roll anything.
        app.tick(50);
        app.tick(90);
        assert_eq!(app.field.live[0].frame(100), first);
    }
}
