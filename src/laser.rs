use tracing::debug;

use crate::proto::command::LaserCommands;
use crate::proto::response::{is_token, parse_f64, Completion};
use crate::proto::transport::Transport;
use crate::proto::Result;
use crate::session::InstrumentSession;

/// Tunable laser source.
///
/// Every method is a single round trip on the session. Wavelength
/// values are passed through as is, range checks are the instrument's.
pub struct Laser<T> {
    session: InstrumentSession<T>,
    commands: LaserCommands,
}

impl<T: Transport> Laser<T> {
    pub fn new(session: InstrumentSession<T>, commands: LaserCommands) -> Self {
        Self { session, commands }
    }

    pub async fn ident(&mut self) -> Result<String> {
        let response = self.session.query(&self.commands.ident).await?;
        Ok(response.trim().to_string())
    }

    /// `None` when the command set cannot report the shutter state.
    pub async fn shutter_closed(&mut self) -> Result<Option<bool>> {
        let Some(query) = self.commands.shutter_state.as_deref() else {
            return Ok(None);
        };
        let response = self.session.query(query).await?;
        Ok(Some(is_token(&response, &self.commands.shutter_closed_token)))
    }

    pub async fn open_shutter(&mut self) -> Result<()> {
        self.session.write(&self.commands.open_shutter).await
    }

    pub async fn close_shutter(&mut self) -> Result<()> {
        self.session.write(&self.commands.close_shutter).await
    }

    pub async fn wavelength(&mut self) -> Result<f64> {
        let response = self.session.query(&self.commands.wavelength).await?;
        parse_f64(&self.commands.wavelength, &response)
    }

    /// Starts the move and returns right away, see [`Self::operation_complete`].
    pub async fn set_wavelength(&mut self, wavelength: f64) -> Result<()> {
        let command = self.commands.render_set_wavelength(wavelength);
        self.session.write(&command).await
    }

    pub async fn operation_complete(&mut self) -> Result<Completion> {
        let Some(query) = self.commands.operation_complete.as_deref() else {
            debug!(instrument = self.session.name(), "No completion query in command set");
            return Ok(Completion::Pending);
        };
        let response = self.session.query(query).await?;
        if is_token(&response, &self.commands.complete_token) {
            Ok(Completion::Done)
        } else {
            Ok(Completion::Pending)
        }
    }
}
