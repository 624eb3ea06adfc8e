//! SD/MMC block device driver written in Embedded Rust, that inspired by [embedded-sdmmc](https://crates.io/crates/embedded-sdmmc).
//!
//! This crate is intended to allow a FAT filesystem layer to init/read/write
//! SD/MMC devices by SPI bus. Whole sectors move either by 16-bit programmed
//! I/O ([`WordTransfer`]) or by scatter-gather DMA ([`DmaEngine`]), picked at
//! construction time.
//!
//! ```ignore
//! static COUNTDOWNS: Countdowns = Countdowns::new();
//!
//! let mut sd = SdMmcSpi::new(SpiTransport::new(spi), cs, WordTransfer, &COUNTDOWNS);
//! if sd.initialize().is_ready() {
//!     let mut sector = [0u8; BLOCK_SIZE];
//!     sd.read(&mut sector, 0)?;
//! }
//! ```

#![cfg_attr(not(test), no_std)]

mod config;
mod consts;
mod csd;
mod dma;
mod fattime;
mod response;
mod status;
mod timer;
mod transfer;
mod transport;


pub use crate::{
    config::{DefaultSdMmcSpiConfig, SdMmcSpiConfig},
    consts::{ioctl, BLOCK_SIZE},
    csd::{CapacityProvider, Csd, CsdData, CsdV1, CsdV2},
    dma::{
        completion_channel, Channel, ChannelControl, CompletionQueue, CompletionReceiver,
        CompletionSender, CompletionWait, Direction, DmaChannels, DmaEngine, Increment, RxSegment,
        SegmentMode, TxSegment,
    },
    fattime::fat_timestamp,
    response::R3OcrPayload,
    status::Status,
    timer::{Countdown, Countdowns},
    transfer::{SectorTransfer, WordTransfer},
    transport::{BusClock, ClockHook, SpiTransport, Transport},
};

use crate::{
    consts::{commands, tokens, BLOCK_SIZE_U32, MAX_BLOCKS_PER_REQUEST},
    response::R1Response,
};

use core::marker::PhantomData;
use embedded_hal::digital::v2::OutputPin;
use size::Size;

#[cfg(feature = "log")]
use log::{debug, error, info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, error, info, warn};

#[cfg(all(feature = "defmt-log", feature = "log"))]
compile_error!("Cannot enable both log and defmt-log");

#[cfg(all(not(feature = "defmt-log"), not(feature = "log")))]
compile_error!("Must enable either log or defmt-log");

/// [`SdMmcSpi`] hardware error.
///
/// `T` - transport error type.
/// `S` - select pin error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Error<T, S> {
    /// Error from the SPI peripheral.
    Transport(T),
    /// Couldn't set a select.
    SelectError(S),
    /// Start data token didn't come in time.
    TimeoutReadBuffer,
    /// Card stayed busy.
    TimeoutWaitAvailable,
    /// No response when executing this command.
    TimeoutCommand(u8),
    /// Command rejected (command, R1).
    ErrorCommand(u8, u8),
    /// Unexpected token instead of data start token.
    ReadError(u8),
    /// Data block rejected (data response).
    WriteError(u8),
    /// Card bring-up failed.
    CardNotFound,
}

/// Result error of the block device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum DiskError<E> {
    /// Invalid buffer, sector count or control code.
    InvalidArgument,
    /// Device is not initialized.
    NotInitialized,
    /// Medium is write protected.
    WriteProtected,
    /// Transfer failed.
    Hardware(E),
}

/// Card type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CardType {
    Unknown,
    MMC,
    SD1,
    SD2,
    SDHC,
}

impl CardType {
    /// MMC family flag.
    pub const FLAG_MMC: u8 = 0x01;
    /// SD family flag.
    pub const FLAG_SD: u8 = 0x02;
    /// Block addressing flag.
    pub const FLAG_BLOCK: u8 = 0x04;

    /// Type flags as reported by `MMC_GET_TYPE`.
    pub fn flags(self) -> u8 {
        match self {
            CardType::Unknown => 0,
            CardType::MMC => Self::FLAG_MMC,
            CardType::SD1 | CardType::SD2 => Self::FLAG_SD,
            CardType::SDHC => Self::FLAG_SD | Self::FLAG_BLOCK,
        }
    }

    /// Command arguments are sector indices rather than byte offsets.
    pub fn is_block_addressed(self) -> bool {
        self.flags() & Self::FLAG_BLOCK != 0
    }

    /// SD family card.
    pub fn is_sd(self) -> bool {
        self.flags() & Self::FLAG_SD != 0
    }
}

/// `CTRL_POWER` sub-command.
#[derive(Debug)]
pub enum PowerCmd<'a> {
    Off,
    On,
    Get(&'a mut bool),
}

/// Control command.
#[derive(Debug)]
pub enum IoctlCmd<'a> {
    /// Socket power control, allowed in any state.
    CtrlPower(PowerCmd<'a>),
    /// Wait until the card finished internal writes.
    CtrlSync,
    /// Count of sectors on the card.
    GetSectorCount(&'a mut u32),
    /// Sector size, always [`BLOCK_SIZE`].
    GetSectorSize(&'a mut u16),
    /// Detected card type.
    GetType(&'a mut CardType),
    /// Raw CSD register.
    GetCsd(&'a mut CsdData),
    /// Raw CID register.
    GetCid(&'a mut [u8; 16]),
    /// Raw OCR register.
    GetOcr(&'a mut R3OcrPayload),
}

/// Hardware error type alias.
pub type ErrorFor<Bus, Cs> = Error<<Bus as Transport>::Error, <Cs as OutputPin>::Error>;

/// Disk error type alias.
type DiskErrorFor<Bus, Cs> = DiskError<ErrorFor<Bus, Cs>>;

/// SD Card SPI driver.
///
/// `Bus` - byte exchange with the card.
/// `Cs` - Chip select output pin, active low.
/// `Xfer` - sector transfer strategy.
/// `Config` - Config implementation of driver config trait.
pub struct SdMmcSpi<'a, Bus, Cs, Xfer, Config = DefaultSdMmcSpiConfig>
where
    Bus: Transport,
    Cs: OutputPin,
    Xfer: SectorTransfer<Bus>,
    Config: SdMmcSpiConfig,
{
    bus: Bus,
    cs: Cs,
    transfer: Xfer,
    countdowns: &'a Countdowns,
    status: Status,
    card_type: CardType,
    powered: bool,
    config: PhantomData<Config>,
}

impl<'a, Bus, Cs, Xfer> SdMmcSpi<'a, Bus, Cs, Xfer, DefaultSdMmcSpiConfig>
where
    Bus: Transport,
    Cs: OutputPin,
    Cs::Error: core::fmt::Debug,
    Xfer: SectorTransfer<Bus>,
{
    /// Creates a new [`SdMmcSpi`] with the default config.
    ///
    /// `bus` - SPI transport.
    /// `cs` - chip select output pin.
    /// `transfer` - sector transfer strategy.
    /// `countdowns` - countdowns ticked every 10 ms.
    pub fn new(bus: Bus, cs: Cs, transfer: Xfer, countdowns: &'a Countdowns) -> Self {
        Self::with_config(bus, cs, transfer, countdowns)
    }
}

impl<'a, Bus, Cs, Xfer, Config> SdMmcSpi<'a, Bus, Cs, Xfer, Config>
where
    Bus: Transport,
    Cs: OutputPin,
    Cs::Error: core::fmt::Debug,
    Xfer: SectorTransfer<Bus>,
    Config: SdMmcSpiConfig,
{
    /// Receive transfer token.
    const RECEIVE_TRANSFER_TOKEN: u8 = 0xFF;
    /// Size of the CRC after a data block.
    const DATA_CRC_SIZE: usize = 2;

    /// Creates a new [`SdMmcSpi`].
    pub fn with_config(bus: Bus, cs: Cs, transfer: Xfer, countdowns: &'a Countdowns) -> Self {
        SdMmcSpi {
            bus,
            cs,
            transfer,
            countdowns,
            status: Status::NOT_INITIALIZED,
            card_type: CardType::Unknown,
            powered: false,
            config: PhantomData::<Config>,
        }
    }

    /// Releases the bus, the select pin and the transfer strategy.
    pub fn free(self) -> (Bus, Cs, Xfer) {
        (self.bus, self.cs, self.transfer)
    }

    /// Card type detected by the last [`initialize`](Self::initialize).
    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    /// Socket switches: card presence and write protect tab.
    pub fn update_socket(&mut self, present: bool, write_protected: bool) {
        self.status.set_no_media(!present);
        self.status.set_write_protected(write_protected);
        if !present {
            self.status.set_not_initialized(true);
        }
    }

    /// Validate buffer for read/write, returns count of blocks.
    fn validate_buffer_len(buf_len: usize) -> Result<usize, DiskErrorFor<Bus, Cs>> {
        let block_count = buf_len / BLOCK_SIZE;

        if buf_len == 0 || buf_len % BLOCK_SIZE != 0 || block_count > MAX_BLOCKS_PER_REQUEST {
            error!(
                "SD invalid buffer, length: {}, block size: {}",
                buf_len, BLOCK_SIZE
            );
            Err(DiskError::InvalidArgument)
        } else {
            Ok(block_count)
        }
    }

    /// Validate initialized.
    fn validate_initialized(&self) -> Result<(), DiskErrorFor<Bus, Cs>> {
        if self.status.not_initialized() {
            Err(DiskError::NotInitialized)
        } else {
            Ok(())
        }
    }

    /// Convert lba.
    fn convert_lba(&self, lba: u32) -> Result<u32, DiskErrorFor<Bus, Cs>> {
        if self.card_type.is_block_addressed() {
            Ok(lba)
        } else {
            lba.checked_mul(BLOCK_SIZE_U32)
                .ok_or(DiskError::InvalidArgument)
        }
    }

    /// Activate chip select.
    fn select(&mut self) -> Result<(), ErrorFor<Bus, Cs>> {
        self.cs.set_low().map_err(Error::SelectError)
    }

    /// Deactivate chip select.
    fn unselect(&mut self) -> Result<(), ErrorFor<Bus, Cs>> {
        self.cs.set_high().map_err(Error::SelectError)
    }

    /// CS scope. One extra byte after unselect releases the data out line.
    fn cs_scope<R, F>(&mut self, f: F) -> Result<R, ErrorFor<Bus, Cs>>
    where
        F: FnOnce(&mut Self) -> Result<R, ErrorFor<Bus, Cs>>,
    {
        self.select()?;
        let result = f(self);
        self.unselect()?;
        self.skip_byte()?;

        result
    }

    /// Send one byte and receive one byte.
    fn transfer(&mut self, data: u8) -> Result<u8, ErrorFor<Bus, Cs>> {
        self.bus.exchange(data).map_err(Error::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    fn receive(&mut self) -> Result<u8, ErrorFor<Bus, Cs>> {
        self.transfer(Self::RECEIVE_TRANSFER_TOKEN)
    }

    /// Send a byte to the SD card.
    fn send(&mut self, data: u8) -> Result<(), ErrorFor<Bus, Cs>> {
        self.transfer(data).map(|_| ())
    }

    /// Receive a slice from the SD card.
    fn receive_slice(&mut self, data: &mut [u8]) -> Result<(), ErrorFor<Bus, Cs>> {
        for byte in data.iter_mut() {
            *byte = self.receive()?;
        }

        Ok(())
    }

    /// Send a slice to the SD card.
    fn send_slice(&mut self, data: &[u8]) -> Result<(), ErrorFor<Bus, Cs>> {
        for byte in data.iter() {
            self.send(*byte)?;
        }

        Ok(())
    }

    /// Skip byte.
    fn skip_byte(&mut self) -> Result<(), ErrorFor<Bus, Cs>> {
        self.receive().map(|_| ())
    }

    /// Poll until the card releases the busy state or the ready countdown expires.
    ///
    /// Returns the last byte read, `0xFF` means ready.
    fn wait_ready(&mut self) -> Result<u8, ErrorFor<Bus, Cs>> {
        self.countdowns
            .arm(Countdown::Ready, Config::READY_TIMEOUT_TICKS);
        self.skip_byte()?;

        loop {
            let token = self.receive()?;

            if token == tokens::AVAILABLE || !self.countdowns.is_running(Countdown::Ready) {
                return Ok(token);
            }
        }
    }

    /// Wait available state of card.
    fn wait_available_state(&mut self) -> Result<(), ErrorFor<Bus, Cs>> {
        if self.wait_ready()? == tokens::AVAILABLE {
            Ok(())
        } else {
            Err(Error::TimeoutWaitAvailable)
        }
    }

    /// Send command.
    ///
    /// Returns [`R1Response::NO_RESPONSE`] if the card is busy, or the last
    /// byte read if no valid R1 came in time.
    fn send_command(&mut self, cmd: u8, arg: u32) -> Result<R1Response, ErrorFor<Bus, Cs>> {
        if self.wait_ready()? != tokens::AVAILABLE {
            warn!("SD busy before CMD{}", commands::index(cmd));
            return Ok(R1Response::NO_RESPONSE);
        }

        self.send_slice(&command_frame(cmd, arg))?;

        let mut r1 = R1Response::NO_RESPONSE;
        for _ in 0..Config::READ_R1_ATTEMPTS {
            r1 = R1Response(self.receive()?);

            if r1.is_valid() {
                break;
            }
        }

        Ok(r1)
    }

    /// Send application specific command, prefixed by APP_CMD.
    fn send_app_command(&mut self, cmd: u8, arg: u32) -> Result<R1Response, ErrorFor<Bus, Cs>> {
        let r1 = self.send_command(commands::CMD55, 0x0000_0000)?;

        if !r1.is_accepted() {
            return Ok(r1);
        }

        self.send_command(cmd, arg)
    }

    /// Send command, that must be answered with ready state.
    fn command(&mut self, cmd: u8, arg: u32) -> Result<(), ErrorFor<Bus, Cs>> {
        match self.send_command(cmd, arg)? {
            R1Response::READY_STATE => Ok(()),
            r1 if !r1.is_valid() => Err(Error::TimeoutCommand(cmd)),
            r1 => {
                warn!(
                    "Wrong response from CMD{}: {:#x}",
                    commands::index(cmd),
                    r1.0
                );
                Err(Error::ErrorCommand(cmd, r1.0))
            }
        }
    }

    /// Send STOP_TRANSMISSION while the card streams data blocks.
    ///
    /// Doesn't wait for ready. Some cards omit the filler bytes before R1, so
    /// the latest non-`0xFF` byte of the window is taken as the response.
    fn send_stop_transmission(&mut self) -> Result<R1Response, ErrorFor<Bus, Cs>> {
        self.send_slice(&command_frame(commands::CMD12, 0x0000_0000))?;

        let mut r1 = R1Response::NO_RESPONSE;
        for _ in 0..Config::STOP_RESPONSE_WINDOW {
            let byte = self.receive()?;

            if byte != tokens::AVAILABLE {
                r1 = R1Response(byte);
            }
        }

        Ok(r1)
    }

    /// Read data block.
    ///
    /// Whole sectors go through the transfer strategy, registers byte by byte.
    fn read_data(&mut self, data: &mut [u8]) -> Result<(), ErrorFor<Bus, Cs>> {
        self.countdowns
            .arm(Countdown::Transfer, Config::DATA_TIMEOUT_TICKS);

        let token = loop {
            let token = self.receive()?;

            if token != tokens::AVAILABLE || !self.countdowns.is_running(Countdown::Transfer) {
                break token;
            }
        };

        match token {
            tokens::DATA_START_BLOCK => {}
            tokens::AVAILABLE => return Err(Error::TimeoutReadBuffer),
            token => return Err(Error::ReadError(token)),
        }

        if data.len() == BLOCK_SIZE {
            self.transfer
                .receive_sector(&mut self.bus, data)
                .map_err(Error::Transport)
        } else {
            self.receive_slice(data)?;
            for _ in 0..Self::DATA_CRC_SIZE {
                self.skip_byte()?;
            }

            Ok(())
        }
    }

    /// Write data block, or only the stop token.
    fn write_data(&mut self, token: u8, data: &[u8]) -> Result<(), ErrorFor<Bus, Cs>> {
        self.wait_available_state()?;

        if token == tokens::STOP_TRAN {
            return self.send(token);
        }

        self.transfer
            .send_sector(&mut self.bus, token, data)
            .map_err(Error::Transport)?;

        let response = self.receive()?;
        if (response & tokens::DATA_RES_MASK) != tokens::DATA_RES_ACCEPTED {
            error!("SD rejected data block: {:#x}", response);
            Err(Error::WriteError(response))
        } else {
            Ok(())
        }
    }

    /// Poll `f` until it answers ready state or the init countdown expires.
    fn poll_ready_state<F>(&mut self, mut f: F) -> Result<bool, ErrorFor<Bus, Cs>>
    where
        F: FnMut(&mut Self) -> Result<R1Response, ErrorFor<Bus, Cs>>,
    {
        loop {
            if f(self)? == R1Response::READY_STATE {
                return Ok(true);
            }

            if !self.countdowns.is_running(Countdown::Transfer) {
                return Ok(false);
            }
        }
    }

    /// SD v2: activate with high capacity support, then check capacity status.
    fn init_sd2(&mut self) -> Result<CardType, ErrorFor<Bus, Cs>> {
        info!("Sending host capacity support information and activates");

        if !self.poll_ready_state(|s| s.send_app_command(commands::ACMD41, commands::ACMD41_HCS))? {
            warn!("SD v2 didn't leave idle state");
            return Ok(CardType::Unknown);
        }

        if self.send_command(commands::CMD58, 0x0000_0000)? != R1Response::READY_STATE {
            warn!("SD v2 refused READ_OCR");
            return Ok(CardType::Unknown);
        }

        let mut ocr: R3OcrPayload = Default::default();
        self.receive_slice(&mut ocr)?;

        Ok(if ocr[0] & tokens::OCR_CCS != 0 {
            CardType::SDHC
        } else {
            CardType::SD2
        })
    }

    /// SD v1 or MMC: pick the activation command, then fix block length.
    fn init_sd1_or_mmc(&mut self) -> Result<CardType, ErrorFor<Bus, Cs>> {
        let card_type = if self
            .send_app_command(commands::ACMD41, 0x0000_0000)?
            .is_accepted()
        {
            CardType::SD1
        } else {
            CardType::MMC
        };

        info!("Activating {:?}", card_type);

        let activated = match card_type {
            CardType::SD1 => {
                self.poll_ready_state(|s| s.send_app_command(commands::ACMD41, 0x0000_0000))?
            }
            _ => self.poll_ready_state(|s| s.send_command(commands::CMD1, 0x0000_0000))?,
        };

        if !activated {
            warn!("SD didn't leave idle state");
            return Ok(CardType::Unknown);
        }

        if self.send_command(commands::CMD16, BLOCK_SIZE_U32)? != R1Response::READY_STATE {
            warn!("SD refused SET_BLOCKLEN");
            return Ok(CardType::Unknown);
        }

        Ok(card_type)
    }

    /// Check SD type.
    fn check_type(&mut self) -> Result<CardType, ErrorFor<Bus, Cs>> {
        info!("Checking SD type");

        if self.send_command(commands::CMD0, 0x0000_0000)? != R1Response::IN_IDLE_STATE {
            warn!("SD didn't enter idle state");
            return Ok(CardType::Unknown);
        }

        self.countdowns
            .arm(Countdown::Transfer, Config::INIT_TIMEOUT_TICKS);

        if self.send_command(commands::CMD8, commands::CMD8_ARG)? == R1Response::IN_IDLE_STATE {
            let mut echo: R3OcrPayload = Default::default();
            self.receive_slice(&mut echo)?;

            if echo[2] == tokens::CMD8_VOLTAGE && echo[3] == tokens::CMD8_PATTERN {
                return self.init_sd2();
            }

            warn!("Wrong SEND_IF_COND echo: {:#x} {:#x}", echo[2], echo[3]);
        }

        self.init_sd1_or_mmc()
    }

    /// Send 74+ clocks with CS high to enter native mode.
    fn send_initial_clock_train(&mut self) -> Result<(), ErrorFor<Bus, Cs>> {
        self.unselect()?;

        for _ in 0..Config::INIT_CLOCK_BYTES {
            self.send(Self::RECEIVE_TRANSFER_TOKEN)?;
        }

        Ok(())
    }

    /// Socket power on: slow clock, initial clock train, idle transfer machinery.
    fn power_on(&mut self) -> Result<(), ErrorFor<Bus, Cs>> {
        debug!("SD power on");

        self.bus
            .set_clock(BusClock::Slow)
            .map_err(Error::Transport)?;
        self.send_initial_clock_train()?;
        self.transfer.reset();
        self.powered = true;

        Ok(())
    }

    /// Socket power off.
    fn power_off(&mut self) {
        debug!("SD power off");

        self.powered = false;
    }

    /// Power on and bring the card up.
    fn init(&mut self) -> Result<CardType, ErrorFor<Bus, Cs>> {
        self.power_on()?;

        match self.cs_scope(|s| s.check_type())? {
            CardType::Unknown => Err(Error::CardNotFound),
            card_type => {
                self.bus
                    .set_clock(BusClock::Fast)
                    .map_err(Error::Transport)?;
                Ok(card_type)
            }
        }
    }

    /// Read CSD.
    fn read_csd(&mut self) -> Result<Csd, ErrorFor<Bus, Cs>> {
        let mut csd_data: CsdData = Default::default();

        self.command(commands::CMD9, 0x0000_0000)?;
        self.read_data(&mut csd_data)?;

        Ok(Csd::from(csd_data))
    }

    /// Commands that talk to an initialized card.
    fn media_ioctl(&mut self, cmd: IoctlCmd) -> Result<(), ErrorFor<Bus, Cs>> {
        match cmd {
            IoctlCmd::CtrlPower(_) => {} // handled without the card
            IoctlCmd::CtrlSync => self.wait_available_state()?,
            IoctlCmd::GetSectorCount(count) => *count = self.read_csd()?.card_capacity_blocks(),
            IoctlCmd::GetSectorSize(size) => *size = BLOCK_SIZE as u16,
            IoctlCmd::GetType(card_type) => *card_type = self.card_type,
            IoctlCmd::GetCsd(csd) => {
                self.command(commands::CMD9, 0x0000_0000)?;
                self.read_data(csd)?;
            }
            IoctlCmd::GetCid(cid) => {
                self.command(commands::CMD10, 0x0000_0000)?;
                self.read_data(cid)?;
            }
            IoctlCmd::GetOcr(ocr) => {
                self.command(commands::CMD58, 0x0000_0000)?;
                self.receive_slice(ocr)?;
            }
        }

        Ok(())
    }

    /// Socket power control.
    fn power_control(&mut self, cmd: PowerCmd) -> Result<(), DiskErrorFor<Bus, Cs>> {
        match cmd {
            PowerCmd::Off => {
                if self.powered {
                    self.power_off();
                }
            }
            PowerCmd::On => self.power_on().map_err(DiskError::Hardware)?,
            PowerCmd::Get(on) => *on = self.powered,
        }

        Ok(())
    }

    /// Power on, bring the card up and switch to the operating clock.
    ///
    /// Returns the resulting status, [`Status::is_ready`] on success.
    pub fn initialize(&mut self) -> Status {
        if self.status.no_media() {
            warn!("SD initialize without media");
            return self.status;
        }

        info!("SD initialize started");

        match self.init() {
            Ok(card_type) => {
                self.card_type = card_type;
                self.status.set_not_initialized(false);
                info!("SD successfully initialized, type: {:?}", card_type);
            }
            Err(_) => {
                self.card_type = CardType::Unknown;
                self.status.set_not_initialized(true);
                self.power_off();
                error!("Failed to initialize SD");
            }
        }

        self.status
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Read `buf.len() / 512` sectors starting at `lba`.
    pub fn read(&mut self, buf: &mut [u8], lba: u32) -> Result<(), DiskErrorFor<Bus, Cs>> {
        let block_count = Self::validate_buffer_len(buf.len())?;
        self.validate_initialized()?;

        let address = self.convert_lba(lba)?;
        debug!("Read {} blocks @ {}", block_count, lba);

        self.cs_scope(|s| {
            if block_count == 1 {
                s.command(commands::CMD17, address)?;
                s.read_data(buf)
            } else {
                s.command(commands::CMD18, address)?;
                let result = buf
                    .chunks_mut(BLOCK_SIZE)
                    .try_for_each(|chunk| s.read_data(chunk));

                let r1 = s.send_stop_transmission()?;
                if r1 != R1Response::READY_STATE && r1 != R1Response::NO_RESPONSE {
                    warn!("Ignored STOP_TRANSMISSION response: {:#x}", r1.0);
                }

                result
            }
        })
        .map_err(DiskError::Hardware)
    }

    /// Write `buf.len() / 512` sectors starting at `lba`.
    pub fn write(&mut self, buf: &[u8], lba: u32) -> Result<(), DiskErrorFor<Bus, Cs>> {
        let block_count = Self::validate_buffer_len(buf.len())?;
        self.validate_initialized()?;

        if self.status.write_protected() {
            return Err(DiskError::WriteProtected);
        }

        let address = self.convert_lba(lba)?;
        debug!("Writing {} blocks @ {}", block_count, lba);

        self.cs_scope(|s| {
            if block_count == 1 {
                s.command(commands::CMD24, address)?;
                s.write_data(tokens::DATA_START_BLOCK, buf)
            } else {
                if s.card_type.is_sd() {
                    s.send_app_command(commands::ACMD23, block_count as u32)?;
                }

                s.command(commands::CMD25, address)?;
                let result = buf
                    .chunks(BLOCK_SIZE)
                    .try_for_each(|block| s.write_data(tokens::WRITE_MULTIPLE, block));

                let stop = s.write_data(tokens::STOP_TRAN, &[]);

                result.and(stop)
            }
        })
        .map_err(DiskError::Hardware)
    }

    /// Control command.
    pub fn ioctl(&mut self, cmd: IoctlCmd) -> Result<(), DiskErrorFor<Bus, Cs>> {
        if let IoctlCmd::CtrlPower(power) = cmd {
            return self.power_control(power);
        }

        self.validate_initialized()?;

        self.cs_scope(|s| s.media_ioctl(cmd))
            .map_err(DiskError::Hardware)
    }

    /// Leading `N` bytes of a control buffer.
    fn out_buffer<const N: usize>(buf: &mut [u8]) -> Result<&mut [u8; N], DiskErrorFor<Bus, Cs>> {
        buf.get_mut(..N)
            .and_then(|out| out.try_into().ok())
            .ok_or(DiskError::InvalidArgument)
    }

    /// Control command by its numeric code, see [`ioctl`].
    ///
    /// Integers are written little-endian into `buf`.
    pub fn control(&mut self, code: u8, buf: &mut [u8]) -> Result<(), DiskErrorFor<Bus, Cs>> {
        match code {
            ioctl::CTRL_SYNC => self.ioctl(IoctlCmd::CtrlSync),
            ioctl::GET_SECTOR_COUNT => {
                let out = Self::out_buffer::<4>(buf)?;
                let mut count = 0;
                self.ioctl(IoctlCmd::GetSectorCount(&mut count))?;
                *out = count.to_le_bytes();
                Ok(())
            }
            ioctl::GET_SECTOR_SIZE => {
                let out = Self::out_buffer::<2>(buf)?;
                let mut size = 0;
                self.ioctl(IoctlCmd::GetSectorSize(&mut size))?;
                *out = size.to_le_bytes();
                Ok(())
            }
            ioctl::CTRL_POWER => match buf {
                [ioctl::POWER_OFF, ..] => self.ioctl(IoctlCmd::CtrlPower(PowerCmd::Off)),
                [ioctl::POWER_ON, ..] => self.ioctl(IoctlCmd::CtrlPower(PowerCmd::On)),
                [ioctl::POWER_GET, state, ..] => {
                    let mut on = false;
                    self.ioctl(IoctlCmd::CtrlPower(PowerCmd::Get(&mut on)))?;
                    *state = u8::from(on);
                    Ok(())
                }
                _ => Err(DiskError::InvalidArgument),
            },
            ioctl::MMC_GET_TYPE => {
                let out = Self::out_buffer::<1>(buf)?;
                let mut card_type = CardType::Unknown;
                self.ioctl(IoctlCmd::GetType(&mut card_type))?;
                out[0] = card_type.flags();
                Ok(())
            }
            ioctl::MMC_GET_CSD => self.ioctl(IoctlCmd::GetCsd(Self::out_buffer(buf)?)),
            ioctl::MMC_GET_CID => self.ioctl(IoctlCmd::GetCid(Self::out_buffer(buf)?)),
            ioctl::MMC_GET_OCR => self.ioctl(IoctlCmd::GetOcr(Self::out_buffer(buf)?)),
            _ => Err(DiskError::InvalidArgument),
        }
    }

    /// Card capacity.
    pub fn capacity(&mut self) -> Result<Size, DiskErrorFor<Bus, Cs>> {
        self.validate_initialized()?;

        let csd = self
            .cs_scope(|s| s.read_csd())
            .map_err(DiskError::Hardware)?;
        let capacity = csd.card_capacity();
        info!("SD capacity: {} bytes", capacity.bytes());

        Ok(capacity)
    }
}

/// Build a 6-byte command frame.
///
/// Only GO_IDLE_STATE and SEND_IF_COND are sent before the card stops
/// checking CRC, the rest get a filler byte.
fn command_frame(cmd: u8, arg: u32) -> [u8; 6] {
    let [a3, a2, a1, a0] = arg.to_be_bytes();
    let crc = match cmd {
        commands::CMD0 => commands::CMD0_CRC,
        commands::CMD8 => commands::CMD8_CRC,
        _ => commands::DUMMY_CRC,
    };

    [cmd, a3, a2, a1, a0, crc]
}
