//! Owners of server-side state.
//!
//! A server stands in for a detector or an actuator whose real driver runs
//! in the connected client. The proxy keeps what the client last reported
//! and fans changes out to any number of subscribers.

use std::sync::mpsc::{self, Receiver, Sender};

use daqlink_wire::{Scalar, WireValue};
use tracing::debug;

use crate::command::{Axis, AxisInfo, Command, CommandName};
use crate::registry::ConnectionId;
use crate::role::ProxyRole;
use crate::settings::ShadowSettings;

/// Change published by a proxy to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyEvent {
    /// A grabber delivered an acquisition.
    DataReady(Vec<WireValue>),
    /// Axis values changed.
    Axis { axis: Axis, info: AxisInfo },
    /// Actuator reported its current position.
    Position(Scalar),
    /// Actuator finished a move.
    MoveDone(Scalar),
    /// The shadow settings changed under `key` (empty for the whole tree).
    SettingsChanged { key: String },
    /// Any other command the peer sent.
    PeerCommand(Command),
}

/// Fans events out to subscribers, dropping the ones that went away.
#[derive(Debug, Default)]
pub struct EventPublisher {
    subscribers: Vec<Sender<ProxyEvent>>,
}

impl EventPublisher {
    pub fn subscribe(&mut self) -> Receiver<ProxyEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, event: ProxyEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Side effects of dispatched commands.
///
/// Only [`Proxy::role`] and the settings accessors are required; every
/// hook defaults to doing nothing.
pub trait Proxy {
    /// Which kind of module this proxy stands in for. Decides the accepted
    /// client role and the command allow-list.
    fn role(&self) -> ProxyRole;

    fn settings(&self) -> &ShadowSettings;

    fn settings_mut(&mut self) -> &mut ShadowSettings;

    /// Whether a command name may be dispatched or sent.
    fn accepts(&self, name: &str) -> bool {
        self.role().allows(name)
    }

    /// `Done`: the client delivers one acquisition.
    fn deliver_data(&mut self, _values: Vec<WireValue>) {}

    /// `position_is` (`move_done == false`) or `move_done`.
    fn update_position(&mut self, _position: Scalar, _move_done: bool) {}

    /// `x_axis` / `y_axis`.
    fn update_axis(&mut self, _axis: Axis, _info: AxisInfo) {}

    /// Called after `Infos`, `Info_xml` or `Info` changed the shadow settings.
    fn settings_changed(&mut self, _key: &str) {}

    /// Commands outside the self-contained set.
    ///
    /// A returned command is relayed to the primary connection of this
    /// proxy's role.
    fn on_peer_command(&mut self, _origin: ConnectionId, _command: Command) -> Option<Command> {
        None
    }

    /// Called after the server wrote `command` to a client.
    fn on_command_sent(&mut self, _command: &Command) {}
}

/// Proxy for a remote detector.
#[derive(Debug, Default)]
pub struct GrabberProxy {
    settings: ShadowSettings,
    last_data: Option<Vec<WireValue>>,
    deliveries: u64,
    x_axis: Option<AxisInfo>,
    y_axis: Option<AxisInfo>,
    pending_grab: bool,
    events: EventPublisher,
}

impl GrabberProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    /// Payload of the most recent `Done`.
    pub fn last_data(&self) -> Option<&[WireValue]> {
        self.last_data.as_deref()
    }

    /// Number of `Done` commands received so far.
    pub fn deliveries(&self) -> u64 {
        self.deliveries
    }

    pub fn axis(&self, axis: Axis) -> Option<&AxisInfo> {
        match axis {
            Axis::X => self.x_axis.as_ref(),
            Axis::Y => self.y_axis.as_ref(),
        }
    }

    /// True between a `Send Data *` going out and the matching `Done`.
    pub fn is_grabbing(&self) -> bool {
        self.pending_grab
    }
}

impl Proxy for GrabberProxy {
    fn role(&self) -> ProxyRole {
        ProxyRole::Grabber
    }

    fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut ShadowSettings {
        &mut self.settings
    }

    fn deliver_data(&mut self, values: Vec<WireValue>) {
        debug!(items = values.len(), "grabber delivered data");
        self.deliveries += 1;
        self.pending_grab = false;
        self.last_data = Some(values.clone());
        self.events.publish(ProxyEvent::DataReady(values));
    }

    fn update_axis(&mut self, axis: Axis, info: AxisInfo) {
        match axis {
            Axis::X => self.x_axis = Some(info.clone()),
            Axis::Y => self.y_axis = Some(info.clone()),
        }
        self.events.publish(ProxyEvent::Axis { axis, info });
    }

    fn settings_changed(&mut self, key: &str) {
        self.events.publish(ProxyEvent::SettingsChanged {
            key: key.to_string(),
        });
    }

    fn on_peer_command(&mut self, _origin: ConnectionId, command: Command) -> Option<Command> {
        match command {
            Command::SendData(_) => Some(command),
            other => {
                self.events.publish(ProxyEvent::PeerCommand(other));
                None
            }
        }
    }

    fn on_command_sent(&mut self, command: &Command) {
        if matches!(command, Command::SendData(_)) {
            self.pending_grab = true;
        }
    }
}

/// Proxy for a remote actuator.
#[derive(Debug, Default)]
pub struct ActuatorProxy {
    settings: ShadowSettings,
    position: Option<Scalar>,
    moving: bool,
    events: EventPublisher,
}

impl ActuatorProxy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    /// Last reported position as sent by the client.
    pub fn position(&self) -> Option<&Scalar> {
        self.position.as_ref()
    }

    /// Last reported position widened to `f64`.
    pub fn current_position(&self) -> Option<f64> {
        self.position.as_ref().and_then(Scalar::as_f64)
    }

    /// True between a move command going out and `move_done` coming back.
    pub fn is_moving(&self) -> bool {
        self.moving
    }
}

impl Proxy for ActuatorProxy {
    fn role(&self) -> ProxyRole {
        ProxyRole::Actuator
    }

    fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut ShadowSettings {
        &mut self.settings
    }

    fn update_position(&mut self, position: Scalar, move_done: bool) {
        debug!(position = ?position.as_f64(), move_done, "actuator position");
        self.position = Some(position.clone());
        if move_done {
            self.moving = false;
            self.events.publish(ProxyEvent::MoveDone(position));
        } else {
            self.events.publish(ProxyEvent::Position(position));
        }
    }

    fn settings_changed(&mut self, key: &str) {
        self.events.publish(ProxyEvent::SettingsChanged {
            key: key.to_string(),
        });
    }

    fn on_peer_command(&mut self, _origin: ConnectionId, command: Command) -> Option<Command> {
        match command.command_name() {
            Some(
                CommandName::MoveAbs
                | CommandName::MoveRel
                | CommandName::MoveHome
                | CommandName::StopMotion
                | CommandName::GetActuatorValue,
            ) => Some(command),
            _ => {
                self.events.publish(ProxyEvent::PeerCommand(command));
                None
            }
        }
    }

    fn on_command_sent(&mut self, command: &Command) {
        match command {
            Command::MoveAbs(_) | Command::MoveRel(_) | Command::MoveHome => self.moving = true,
            Command::StopMotion => self.moving = false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use daqlink_wire::WireArray;

    use super::*;

    #[test]
    fn grabber_caches_and_publishes_data() {
        let mut proxy = GrabberProxy::new();
        let rx = proxy.subscribe();
        proxy.on_command_sent(&Command::SendData(crate::command::DataDim::D1));
        assert!(proxy.is_grabbing());

        let values = vec![WireValue::from("ok"), WireValue::from(5i64)];
        proxy.deliver_data(values.clone());

        assert!(!proxy.is_grabbing());
        assert_eq!(proxy.last_data(), Some(values.as_slice()));
        assert_eq!(proxy.deliveries(), 1);
        assert_eq!(rx.try_recv().expect("event"), ProxyEvent::DataReady(values));
    }

    #[test]
    fn grabber_stores_axes() {
        let mut proxy = GrabberProxy::new();
        let info = AxisInfo::new(WireArray::from_slice(&[1.0f64, 2.0]), "x", "mm");
        proxy.update_axis(Axis::X, info.clone());
        assert_eq!(proxy.axis(Axis::X), Some(&info));
        assert_eq!(proxy.axis(Axis::Y), None);
    }

    #[test]
    fn actuator_tracks_moves() {
        let mut proxy = ActuatorProxy::new();
        let rx = proxy.subscribe();

        proxy.on_command_sent(&Command::move_abs(3.0));
        assert!(proxy.is_moving());

        proxy.update_position(Scalar::new(1.5f64), false);
        assert!(proxy.is_moving());
        assert_eq!(proxy.current_position(), Some(1.5));

        proxy.update_position(Scalar::new(3.0f64), true);
        assert!(!proxy.is_moving());

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                ProxyEvent::Position(Scalar::new(1.5f64)),
                ProxyEvent::MoveDone(Scalar::new(3.0f64)),
            ]
        );
    }

    #[test]
    fn actuator_relays_motion_commands() {
        let mut proxy = ActuatorProxy::new();
        let origin = ConnectionId::new(7);
        assert_eq!(
            proxy.on_peer_command(origin, Command::MoveHome),
            Some(Command::MoveHome)
        );
        assert_eq!(proxy.on_peer_command(origin, Command::Status), None);
    }

    #[test]
    fn publisher_drops_closed_subscribers() {
        let mut publisher = EventPublisher::default();
        let kept = publisher.subscribe();
        drop(publisher.subscribe());
        publisher.publish(ProxyEvent::SettingsChanged { key: String::new() });
        assert_eq!(publisher.subscriber_count(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
