use embassy_rp::pio::Instance;
use embassy_rp::pio_programs::ws2812::PioWs2812;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use protocol::Status;
use smart_leds::RGB8;

pub const ERROR_BLINK_PERIOD: Duration = Duration::from_millis(350);

static STATUS_SIGNAL: Signal<CriticalSectionRawMutex, StatusPattern> = Signal::new();

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusColours {
    Error,
    Idle,
}

impl StatusColours {
    // The onboard WS2812 is wired GRB.
    pub const fn as_rgb(&self) -> RGB8 {
        match self {
            StatusColours::Error => RGB8::new(0, 150, 0),
            StatusColours::Idle => RGB8::new(0, 0, 60),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusPattern {
    Solid(StatusColours),
    Blink {
        colour: StatusColours,
        period: Duration,
    },
}

impl From<Status> for StatusPattern {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => StatusPattern::Solid(StatusColours::Idle),
            Status::Fail => StatusPattern::Blink {
                colour: StatusColours::Error,
                period: ERROR_BLINK_PERIOD,
            },
        }
    }
}

pub struct StatusLed<'d, P, const S: usize, const N: usize>
where
    P: Instance,
{
    led: PioWs2812<'d, P, S, N>,
}

impl<'d, P, const S: usize, const N: usize> StatusLed<'d, P, S, N>
where
    P: Instance,
{
    pub fn new(pio_ws2812: PioWs2812<'d, P, S, N>) -> Self {
        Self { led: pio_ws2812 }
    }

    pub async fn set_rgb(&mut self, colour: RGB8) {
        self.led.write(&[colour; N]).await;
    }
}

/// Show the status latch on the LED.
pub fn show(status: Status) {
    STATUS_SIGNAL.signal(status.into());
}

pub async fn drive<'d, P, const S: usize, const N: usize>(mut led: StatusLed<'d, P, S, N>) -> !
where
    P: Instance,
{
    let mut pattern = STATUS_SIGNAL.wait().await;

    loop {
        pattern = match pattern {
            StatusPattern::Solid(colour) => {
                led.set_rgb(colour.as_rgb()).await;
                STATUS_SIGNAL.wait().await
            }
            StatusPattern::Blink { colour, period } => {
                let half_period = nonzero_duration(period / 2);
                let mut lit = false;
                loop {
                    lit = !lit;
                    let rgb = if lit { colour.as_rgb() } else { RGB8::default() };
                    led.set_rgb(rgb).await;
                    if let Ok(next) = with_timeout(half_period, STATUS_SIGNAL.wait()).await {
                        break next;
                    }
                }
            }
        };
    }
}

fn nonzero_duration(duration: Duration) -> Duration {
    if duration.as_ticks() == 0 {
        Duration::from_ticks(1)
    } else {
        duration
    }
}
