use crate::proto::command::{render, MeterCommands};
use crate::proto::response::{is_token, parse_f64, MeasurementStatus};
use crate::proto::transport::Transport;
use crate::proto::{ProtoError, Result};
use crate::session::InstrumentSession;

/// Optical power meter with numbered input channels.
///
/// A reading is a three step handshake: [`Self::start_measurement`],
/// poll [`Self::measurement_status`] until `Done`, then [`Self::power`].
pub struct PowerMeter<T> {
    session: InstrumentSession<T>,
    commands: MeterCommands,
}

impl<T: Transport> PowerMeter<T> {
    pub fn new(session: InstrumentSession<T>, commands: MeterCommands) -> Self {
        Self { session, commands }
    }

    pub async fn ident(&mut self) -> Result<String> {
        let response = self.session.query(&self.commands.ident).await?;
        Ok(response.trim().to_string())
    }

    pub async fn start_measurement(&mut self, channel: u8) -> Result<()> {
        let command = render(&self.commands.start_measurement, channel.to_string());
        self.session.write(&command).await
    }

    pub async fn measurement_status(&mut self, channel: u8) -> Result<MeasurementStatus> {
        let command = render(&self.commands.measurement_status, channel.to_string());
        let response = self.session.query(&command).await?;
        if is_token(&response, &self.commands.done_token) {
            Ok(MeasurementStatus::Done)
        } else if is_token(&response, &self.commands.measuring_token) {
            Ok(MeasurementStatus::Measuring)
        } else {
            Err(ProtoError::Unexpected { command, response })
        }
    }

    /// Last completed reading of `channel`. Only meaningful after
    /// [`Self::measurement_status`] reported `Done`; may be infinite when
    /// the meter overflowed.
    pub async fn power(&mut self, channel: u8) -> Result<f64> {
        let command = render(&self.commands.fetch_power, channel.to_string());
        let response = self.session.query(&command).await?;
        parse_f64(&command, &response)
    }
}
