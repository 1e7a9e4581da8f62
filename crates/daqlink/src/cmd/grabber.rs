use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use daqlink_peer::{
    AxisInfo, ClientConfig, ClientEvent, ClientRequest, ClientSession, Command, DataDim, GRABBER,
};
use daqlink_wire::{Scalar, WireArray, WireValue};
use tracing::{debug, error};

use crate::cmd::{install_ctrlc_handler, parse_duration, GrabberArgs};
use crate::exit::{peer_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_client_event, OutputFormat};

pub fn run(args: GrabberArgs, format: OutputFormat) -> CliResult<i32> {
    if args.width == 0 || args.height == 0 {
        return Err(CliError::new(USAGE, "frame size must be at least 1x1"));
    }
    let frame = FrameSpec {
        width: args.width,
        height: args.height,
    };

    let config = ClientConfig::new(GRABBER)
        .with_address(args.connect.host.clone(), args.connect.port)
        .with_poll_interval(parse_duration(&args.connect.poll_interval)?)
        .with_settings_xml(frame.settings_xml())
        .with_bootstrap(Command::XAxis(frame.axis(frame.width, "x")))
        .with_bootstrap(Command::YAxis(frame.axis(frame.height, "y")));
    let mut session = ClientSession::new(config);
    let handle = session.handle();

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    if let Err(err) = session.connect() {
        for event in session.take_events() {
            print_client_event(&event, format);
        }
        return Err(peer_error("connect failed", err));
    }

    let mut delivered = 0usize;
    let mut failure = None;
    session
        .run(&running, |event| {
            print_client_event(event, format);
            let ClientEvent::Command(Command::SendData(dim)) = event else {
                return;
            };

            let values = match frame.acquire(*dim, delivered) {
                Ok(values) => values,
                Err(err) => {
                    failure = Some(err);
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };
            debug!(frame = delivered, ?dim, "acquisition ready");
            if let Err(err) = handle.send(ClientRequest::DataReady(values)) {
                error!(error = %err, "acquisition not queued");
                running.store(false, Ordering::SeqCst);
                return;
            }
            delivered += 1;
            if args.count.is_some_and(|limit| delivered >= limit) {
                running.store(false, Ordering::SeqCst);
            }
        })
        .map_err(|err| peer_error("session failed", err))?;

    match failure {
        Some(err) => Err(err),
        None => Ok(SUCCESS),
    }
}

/// Shape and content of the synthetic detector.
struct FrameSpec {
    width: usize,
    height: usize,
}

impl FrameSpec {
    fn settings_xml(&self) -> String {
        format!(
            "<settings><detector>mock</detector><width>{}</width><height>{}</height></settings>",
            self.width, self.height
        )
    }

    fn axis(&self, len: usize, label: &str) -> AxisInfo {
        let values: Vec<f64> = (0..len).map(|i| i as f64).collect();
        AxisInfo::new(WireArray::from_slice(&values), label, "pxl")
    }

    /// One acquisition: a gaussian spot drifting a little with every frame.
    fn acquire(&self, dim: DataDim, index: usize) -> CliResult<Vec<WireValue>> {
        let image = self.gaussian(index);
        let value = match dim {
            DataDim::D0 => {
                let peak = image.iter().copied().fold(f64::MIN, f64::max);
                WireValue::from(Scalar::new(peak))
            }
            DataDim::D1 => {
                let row = self.height / 2;
                WireValue::from(WireArray::from_slice(
                    &image[row * self.width..(row + 1) * self.width],
                ))
            }
            DataDim::D2 | DataDim::DN => WireValue::from(
                WireArray::from_values(vec![self.height, self.width], &image)
                    .map_err(|err| CliError::new(DATA_INVALID, format!("frame: {err}")))?,
            ),
        };
        Ok(vec![value])
    }

    fn gaussian(&self, index: usize) -> Vec<f64> {
        let drift = (index % 8) as f64 - 4.0;
        let cx = self.width as f64 / 2.0 + drift;
        let cy = self.height as f64 / 2.0;
        let sx = (self.width as f64 / 6.0).max(1.0);
        let sy = (self.height as f64 / 6.0).max(1.0);

        let mut image = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let dx = (x as f64 - cx) / sx;
                let dy = (y as f64 - cy) / sy;
                image.push(100.0 * (-(dx * dx + dy * dy) / 2.0).exp());
            }
        }
        image
    }
}
