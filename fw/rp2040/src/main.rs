#![no_std]
#![no_main]

mod gpio;
mod status_led;
mod usb_transport;

use defmt::info;
use embassy_executor::Spawner;
use embassy_futures::join::join5;
use embassy_futures::yield_now;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::Flex;
use embassy_rp::peripherals::{PIO0, USB};
use embassy_rp::pio::{self, Pio};
use embassy_rp::pio_programs::ws2812::{PioWs2812, PioWs2812Program};
use embassy_rp::usb::{self, Driver};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::{Builder, Config};
use protocol::{Device, Progress, PACKET_SIZE, USB_PID, USB_VID};
use {defmt_rtt as _, panic_probe as _};

use crate::gpio::FlexPort;
use crate::status_led::StatusLed;
use crate::usb_transport::ChannelTransport;

bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => usb::InterruptHandler<USB>;
    PIO0_IRQ_0 => pio::InterruptHandler<PIO0>;
});

const STATUS_LEDS: usize = 1;
/// Engine polls per scheduler turn while commands keep completing.
const POLL_BURST: usize = 32;

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    info!("shifty starting");

    let Pio {
        mut common, sm0, ..
    } = Pio::new(p.PIO0, Irqs);
    let program = PioWs2812Program::new(&mut common);
    let ws2812: PioWs2812<'_, PIO0, 0, STATUS_LEDS> =
        PioWs2812::new(&mut common, sm0, p.DMA_CH0, p.PIN_16, &program);
    let led = StatusLed::new(ws2812);

    let driver = Driver::new(p.USB, Irqs);

    let mut config = Config::new(USB_VID, USB_PID);
    config.manufacturer = Some("Shifty");
    config.product = Some("Shifty GPIO shift engine");
    config.max_power = 100;
    config.max_packet_size_0 = 64;

    // Descriptor/state buffers must live for the lifetime of the USB device.
    let mut config_descriptor = [0; 256];
    let mut bos_descriptor = [0; 256];
    let mut control_buf = [0; 64];
    let mut state = State::new();

    let mut builder = Builder::new(
        driver,
        config,
        &mut config_descriptor,
        &mut bos_descriptor,
        &mut [], // No Microsoft OS descriptors
        &mut control_buf,
    );

    let class = CdcAcmClass::new(&mut builder, &mut state, PACKET_SIZE as u16);
    let mut usb = builder.build();
    let (sender, receiver) = class.split();

    let port = FlexPort::new([
        Flex::new(p.PIN_0),
        Flex::new(p.PIN_1),
        Flex::new(p.PIN_2),
        Flex::new(p.PIN_3),
        Flex::new(p.PIN_4),
        Flex::new(p.PIN_5),
    ]);

    let engine_fut = async {
        let mut device = Device::new(ChannelTransport::new(), port);
        let mut shown = device.status();
        status_led::show(shown);

        loop {
            for _ in 0..POLL_BURST {
                if device.poll() != Progress::Completed {
                    break;
                }
            }

            let status = device.status();
            if status != shown {
                info!("status latch now {}", status);
                status_led::show(status);
                shown = status;
            }

            yield_now().await;
        }
    };

    join5(
        usb.run(),
        usb_transport::reader(receiver),
        usb_transport::writer(sender),
        engine_fut,
        status_led::drive(led),
    )
    .await;
}
