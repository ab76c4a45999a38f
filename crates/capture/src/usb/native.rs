//! Native UAC backend on rusb
//!
//! Resolves a [`DeviceIdentity`] to the device's USB Audio Class 1 interfaces
//! and implements [`NativeAudio`] with class-specific control requests:
//! sampling frequency on the streaming endpoint, mute and volume on a feature
//! unit of the control interface. Streaming reads the IN endpoint on a
//! `uac-stream` thread.
//!
//! Isochronous streaming and UVC preview are not provided by this backend.

use super::describe_device;
use super::filter::{DeviceFilter, matches_any};
use super::map_rusb_error;
use byteorder::{ByteOrder, LittleEndian};
use common::{FrameHandler, NativeAudio, NativeDriver, NativeVideo};
use rusb::{ConfigDescriptor, Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use types::{DEFAULT_USBFS_ROOT, DeviceIdentity, DriverError};

const CLASS_AUDIO: u8 = 0x01;
const CLASS_VIDEO: u8 = 0x0e;
const SUBCLASS_AUDIOCONTROL: u8 = 0x01;
const SUBCLASS_AUDIOSTREAMING: u8 = 0x02;

const CS_INTERFACE: u8 = 0x24;
const AS_FORMAT_TYPE: u8 = 0x02;
const AC_FEATURE_UNIT: u8 = 0x06;
const FORMAT_TYPE_I: u8 = 0x01;

const SET_CUR: u8 = 0x01;
const GET_CUR: u8 = 0x81;
const GET_MIN: u8 = 0x82;
const GET_MAX: u8 = 0x83;

/// Class request, host-to-device / device-to-host, recipient interface
const REQ_TYPE_IF_OUT: u8 = 0x21;
const REQ_TYPE_IF_IN: u8 = 0xa1;
/// Class request, host-to-device / device-to-host, recipient endpoint
const REQ_TYPE_EP_OUT: u8 = 0x22;
const REQ_TYPE_EP_IN: u8 = 0xa2;

const SAMPLING_FREQ_CONTROL: u16 = 0x0100;
const MUTE_CONTROL: u16 = 0x0100;
const VOLUME_CONTROL: u16 = 0x0200;

/// Smallest read issued by the streaming loop
const MIN_READ_BYTES: usize = 4096;

/// rusb backend options
#[derive(Debug, Clone)]
pub struct RusbOptions {
    pub control_timeout: Duration,
    pub stream_read_timeout: Duration,
    /// Feature unit carrying mute/volume; the first feature unit is used when
    /// the device has none with this id
    pub feature_unit_id: u8,
    pub usbfs_root: String,
    pub filters: Vec<DeviceFilter>,
}

impl Default for RusbOptions {
    fn default() -> Self {
        Self {
            control_timeout: Duration::from_millis(1000),
            stream_read_timeout: Duration::from_millis(100),
            feature_unit_id: 2,
            usbfs_root: DEFAULT_USBFS_ROOT.to_string(),
            filters: Vec::new(),
        }
    }
}

/// Native driver backed by a libusb context
pub struct RusbDriver {
    context: Context,
    options: RusbOptions,
}

impl RusbDriver {
    pub fn new(options: RusbOptions) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        Ok(Self { context, options })
    }

    fn find_device(&self, identity: &DeviceIdentity) -> Option<Device<Context>> {
        let devices = match self.context.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to list USB devices: {}", e);
                return None;
            }
        };

        devices.iter().find(|device| {
            device.bus_number() == identity.bus_number
                && device.address() == identity.device_address
                && describe_device(device, &self.options.usbfs_root)
                    .map(|(described, _)| described.same_device(identity))
                    .unwrap_or(false)
        })
    }
}

impl NativeDriver for RusbDriver {
    fn enumerate(&self) -> Result<Vec<DeviceIdentity>, DriverError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        let mut identities = Vec::new();

        for device in devices.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() == 0x1d6b && descriptor.class_code() == 9 {
                continue;
            }
            if !matches_any(
                &self.options.filters,
                descriptor.vendor_id(),
                descriptor.product_id(),
            ) {
                continue;
            }

            match describe_device(&device, &self.options.usbfs_root) {
                Ok((identity, true)) => identities.push(identity),
                Ok((identity, false)) => debug!("Skipping inaccessible device {}", identity),
                Err(e) => debug!("Failed to describe device: {}", e),
            }
        }

        debug!("Enumerated {} accessible devices", identities.len());
        Ok(identities)
    }

    fn find_audio(&self, identity: &DeviceIdentity) -> Option<Box<dyn NativeAudio>> {
        let device = self.find_device(identity)?;
        let config = match device.active_config_descriptor() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to get active config descriptor: {}", e);
                return None;
            }
        };

        let layout = AudioLayout::scan(&config, self.options.feature_unit_id)?;
        debug!("Audio layout for {}: {:?}", identity, layout);

        Some(Box::new(RusbAudio {
            device,
            layout,
            options: self.options.clone(),
            handle: None,
            claimed: Vec::new(),
            stream: None,
        }))
    }

    fn find_video(&self, identity: &DeviceIdentity) -> Option<Box<dyn NativeVideo>> {
        let device = self.find_device(identity)?;
        let has_video = device
            .active_config_descriptor()
            .map(|config| {
                config.interfaces().any(|interface| {
                    interface
                        .descriptors()
                        .any(|d| d.class_code() == CLASS_VIDEO)
                })
            })
            .unwrap_or(false);

        if has_video {
            info!(
                "Device {} has a video interface; UVC preview is not available in the rusb backend",
                identity
            );
        }
        None
    }
}

/// Parsed class-specific FORMAT_TYPE_I descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTypeI {
    pub channels: u8,
    pub subframe_size: u8,
    pub bit_resolution: u8,
    /// Discrete rates, or the lower/upper bound of a continuous range
    pub sample_rates: Vec<u32>,
}

/// Feature unit controls available on master channel 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureUnit {
    pub unit_id: u8,
    pub mute: bool,
    pub volume: bool,
}

/// Interfaces and endpoint of one UAC1 audio function
#[derive(Debug, Clone)]
pub struct AudioLayout {
    pub control_interface: u8,
    pub stream_interface: u8,
    pub alt_setting: u8,
    pub endpoint: u8,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    pub format: FormatTypeI,
    pub feature_unit: Option<FeatureUnit>,
}

impl AudioLayout {
    /// Find the audio control interface and the first streaming alternate
    /// setting with an IN endpoint and a FORMAT_TYPE_I descriptor
    pub fn scan(config: &ConfigDescriptor, feature_unit_id: u8) -> Option<Self> {
        let mut control: Option<(u8, Option<FeatureUnit>)> = None;
        let mut stream = None;

        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                if descriptor.class_code() != CLASS_AUDIO {
                    continue;
                }

                match descriptor.sub_class_code() {
                    SUBCLASS_AUDIOCONTROL if control.is_none() => {
                        let feature = parse_feature_unit(descriptor.extra(), feature_unit_id);
                        control = Some((descriptor.interface_number(), feature));
                    }
                    SUBCLASS_AUDIOSTREAMING if stream.is_none() => {
                        let Some(format) = parse_format_type(descriptor.extra()) else {
                            continue;
                        };
                        let endpoint = descriptor
                            .endpoint_descriptors()
                            .find(|ep| ep.direction() == Direction::In);
                        if let Some(ep) = endpoint {
                            stream = Some((
                                descriptor.interface_number(),
                                descriptor.setting_number(),
                                ep.address(),
                                ep.transfer_type(),
                                ep.max_packet_size(),
                                format,
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }

        let (control_interface, feature_unit) = control?;
        let (stream_interface, alt_setting, endpoint, transfer_type, max_packet_size, format) =
            stream?;

        Some(Self {
            control_interface,
            stream_interface,
            alt_setting,
            endpoint,
            transfer_type,
            max_packet_size,
            format,
            feature_unit,
        })
    }
}

/// Iterate class-specific descriptors packed in an interface's extra bytes
fn class_descriptors(extra: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = extra;
    std::iter::from_fn(move || {
        let len = *rest.first()? as usize;
        if len < 2 || len > rest.len() {
            return None;
        }
        let (descriptor, tail) = rest.split_at(len);
        rest = tail;
        Some(descriptor)
    })
}

/// Parse the FORMAT_TYPE_I descriptor of an audio streaming interface
pub fn parse_format_type(extra: &[u8]) -> Option<FormatTypeI> {
    class_descriptors(extra)
        .filter(|d| d.len() >= 8 && d[1] == CS_INTERFACE && d[2] == AS_FORMAT_TYPE)
        .find(|d| d[3] == FORMAT_TYPE_I)
        .map(|d| {
            // bSamFreqType 0 means a continuous range given as two bounds
            let count = match d[7] {
                0 => 2,
                n => n as usize,
            };
            let sample_rates = d[8..]
                .chunks_exact(3)
                .take(count)
                .map(LittleEndian::read_u24)
                .collect();

            FormatTypeI {
                channels: d[4],
                subframe_size: d[5],
                bit_resolution: d[6],
                sample_rates,
            }
        })
}

/// Parse the feature unit of an audio control interface
///
/// Prefers the unit with `preferred_id`, falling back to the first one.
pub fn parse_feature_unit(extra: &[u8], preferred_id: u8) -> Option<FeatureUnit> {
    let units: Vec<FeatureUnit> = class_descriptors(extra)
        .filter(|d| d.len() >= 7 && d[1] == CS_INTERFACE && d[2] == AC_FEATURE_UNIT)
        .map(|d| {
            // bmaControls(0) follows bControlSize
            let controls = d[6];
            FeatureUnit {
                unit_id: d[3],
                mute: controls & 0x01 != 0,
                volume: controls & 0x02 != 0,
            }
        })
        .collect();

    units
        .iter()
        .find(|u| u.unit_id == preferred_id)
        .or_else(|| units.first())
        .copied()
}

struct StreamThread {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// UAC1 audio function of one device
pub struct RusbAudio {
    device: Device<Context>,
    layout: AudioLayout,
    options: RusbOptions,
    handle: Option<Arc<DeviceHandle<Context>>>,
    claimed: Vec<u8>,
    stream: Option<StreamThread>,
}

impl RusbAudio {
    fn handle(&self) -> Result<&DeviceHandle<Context>, DriverError> {
        self.handle.as_deref().ok_or(DriverError::NoDevice)
    }

    fn feature_unit(&self, control: &'static str) -> Result<FeatureUnit, DriverError> {
        self.layout.feature_unit.ok_or(DriverError::Unsupported(control))
    }

    fn feature_index(&self, unit: FeatureUnit) -> u16 {
        ((unit.unit_id as u16) << 8) | self.layout.control_interface as u16
    }

    fn read_feature(
        &self,
        request: u8,
        control: u16,
        buf: &mut [u8],
        name: &'static str,
    ) -> Result<(), DriverError> {
        let unit = self.feature_unit(name)?;
        let read = self
            .handle()?
            .read_control(
                REQ_TYPE_IF_IN,
                request,
                control,
                self.feature_index(unit),
                buf,
                self.options.control_timeout,
            )
            .map_err(map_rusb_error)?;
        if read < buf.len() {
            return Err(DriverError::Usb(format!(
                "short {} read: {} of {} bytes",
                name,
                read,
                buf.len()
            )));
        }
        Ok(())
    }

    fn write_feature(&self, control: u16, buf: &[u8], name: &'static str) -> Result<(), DriverError> {
        let unit = self.feature_unit(name)?;
        self.handle()?
            .write_control(
                REQ_TYPE_IF_OUT,
                SET_CUR,
                control,
                self.feature_index(unit),
                buf,
                self.options.control_timeout,
            )
            .map_err(map_rusb_error)?;
        Ok(())
    }

    fn read_volume(&self, request: u8) -> Result<i32, DriverError> {
        let mut buf = [0u8; 2];
        self.read_feature(request, VOLUME_CONTROL, &mut buf, "volume")?;
        Ok(LittleEndian::read_i16(&buf) as i32)
    }

    fn claim(&mut self, handle: &DeviceHandle<Context>, interface: u8) -> Result<(), DriverError> {
        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                if let Err(e) = handle.detach_kernel_driver(interface) {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                }
            }
            Ok(false) => {}
            Err(e) => debug!(
                "Could not check kernel driver status for interface {}: {}",
                interface, e
            ),
        }

        handle.claim_interface(interface).map_err(|e| {
            warn!("Failed to claim interface {}: {}", interface, e);
            map_rusb_error(e)
        })?;
        self.claimed.push(interface);
        debug!("Claimed interface {}", interface);
        Ok(())
    }

    fn release_all(&mut self, handle: &DeviceHandle<Context>) {
        for interface in self.claimed.drain(..) {
            if let Err(e) = handle.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
            if let Err(e) = handle.attach_kernel_driver(interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                );
            }
        }
    }
}

impl NativeAudio for RusbAudio {
    fn open(&mut self) -> Result<(), DriverError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let handle = self.device.open().map_err(|e| {
            warn!("Failed to open device: {}", e);
            map_rusb_error(e)
        })?;

        let interfaces = [self.layout.control_interface, self.layout.stream_interface];
        for interface in interfaces {
            if let Err(e) = self.claim(&handle, interface) {
                self.release_all(&handle);
                return Err(e);
            }
        }

        self.handle = Some(Arc::new(handle));
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.stop_streaming() {
            debug!("Stopping stream during close failed: {}", e);
        }

        if let Some(handle) = self.handle.take() {
            self.release_all(&handle);
            debug!("Closed audio function");
        }
    }

    fn sample_rate(&self) -> Result<u32, DriverError> {
        let Some(handle) = self.handle.as_deref() else {
            return self
                .layout
                .format
                .sample_rates
                .first()
                .copied()
                .ok_or(DriverError::Unsupported("sampling frequency"));
        };

        let mut buf = [0u8; 3];
        handle
            .read_control(
                REQ_TYPE_EP_IN,
                GET_CUR,
                SAMPLING_FREQ_CONTROL,
                self.layout.endpoint as u16,
                &mut buf,
                self.options.control_timeout,
            )
            .map_err(map_rusb_error)?;
        Ok(LittleEndian::read_u24(&buf))
    }

    fn set_sample_rate(&mut self, rate: u32) -> Result<(), DriverError> {
        let mut buf = [0u8; 3];
        LittleEndian::write_u24(&mut buf, rate);
        self.handle()?
            .write_control(
                REQ_TYPE_EP_OUT,
                SET_CUR,
                SAMPLING_FREQ_CONTROL,
                self.layout.endpoint as u16,
                &buf,
                self.options.control_timeout,
            )
            .map_err(map_rusb_error)?;
        Ok(())
    }

    fn supported_sample_rates(&self) -> String {
        self.layout
            .format
            .sample_rates
            .iter()
            .map(|rate| rate.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn bit_resolution(&self) -> u8 {
        self.layout.format.bit_resolution
    }

    fn channel_count(&self) -> u8 {
        self.layout.format.channels
    }

    fn mute_available(&self) -> bool {
        self.layout.feature_unit.is_some_and(|u| u.mute)
    }

    fn volume_available(&self) -> bool {
        self.layout.feature_unit.is_some_and(|u| u.volume)
    }

    fn mute(&self) -> Result<bool, DriverError> {
        let mut buf = [0u8; 1];
        self.read_feature(GET_CUR, MUTE_CONTROL, &mut buf, "mute")?;
        Ok(buf[0] != 0)
    }

    fn set_mute(&mut self, mute: bool) -> Result<(), DriverError> {
        self.write_feature(MUTE_CONTROL, &[mute as u8], "mute")
    }

    fn volume(&self) -> Result<i32, DriverError> {
        self.read_volume(GET_CUR)
    }

    fn set_volume(&mut self, volume: i32) -> Result<(), DriverError> {
        let mut buf = [0u8; 2];
        let raw = volume.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        LittleEndian::write_i16(&mut buf, raw);
        self.write_feature(VOLUME_CONTROL, &buf, "volume")
    }

    fn volume_range(&self) -> Result<(i32, i32), DriverError> {
        Ok((self.read_volume(GET_MIN)?, self.read_volume(GET_MAX)?))
    }

    fn start_streaming(&mut self, mut handler: FrameHandler) -> Result<(), DriverError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let transfer_type = self.layout.transfer_type;
        if transfer_type == TransferType::Isochronous {
            return Err(DriverError::Unsupported("isochronous streaming"));
        }

        let handle = self.handle.clone().ok_or(DriverError::NoDevice)?;
        handle
            .set_alternate_setting(self.layout.stream_interface, self.layout.alt_setting)
            .map_err(map_rusb_error)?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let endpoint = self.layout.endpoint;
        let timeout = self.options.stream_read_timeout;
        let read_len = (self.layout.max_packet_size as usize).max(MIN_READ_BYTES);

        let thread = std::thread::Builder::new()
            .name("uac-stream".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; read_len];
                debug!("Streaming from endpoint {:#04x}", endpoint);

                while !thread_stop.load(Ordering::Acquire) {
                    let result = match transfer_type {
                        TransferType::Interrupt => handle.read_interrupt(endpoint, &mut buf, timeout),
                        _ => handle.read_bulk(endpoint, &mut buf, timeout),
                    };

                    match result {
                        Ok(0) => {}
                        Ok(n) => {
                            trace!("Read {} bytes from endpoint {:#04x}", n, endpoint);
                            handler(&buf[..n]);
                        }
                        Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => {}
                        Err(e) => {
                            warn!("Streaming read failed, stopping stream: {}", e);
                            break;
                        }
                    }
                }

                debug!("Streaming loop on endpoint {:#04x} exited", endpoint);
            })
            .map_err(|e| DriverError::Usb(format!("failed to spawn stream thread: {}", e)))?;

        self.stream = Some(StreamThread { stop, thread });
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<(), DriverError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        stream.stop.store(true, Ordering::Release);
        if stream.thread.join().is_err() {
            warn!("Stream thread panicked");
        }

        if let Some(handle) = self.handle.as_deref()
            && let Err(e) = handle.set_alternate_setting(self.layout.stream_interface, 0)
        {
            debug!("Failed to reset alternate setting: {}", e);
        }
        Ok(())
    }
}

impl Drop for RusbAudio {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_type_descriptor(channels: u8, bits: u8, rates: &[u32]) -> Vec<u8> {
        let mut d = vec![
            (8 + rates.len() * 3) as u8,
            CS_INTERFACE,
            AS_FORMAT_TYPE,
            FORMAT_TYPE_I,
            channels,
            bits.div_ceil(8),
            bits,
            rates.len() as u8,
        ];
        for rate in rates {
            let mut buf = [0u8; 3];
            LittleEndian::write_u24(&mut buf, *rate);
            d.extend_from_slice(&buf);
        }
        d
    }

    #[test]
    fn test_parse_format_type() {
        // AS_GENERAL precedes the format descriptor
        let mut extra = vec![7, CS_INTERFACE, 0x01, 0x01, 0x01, 0x01, 0x00];
        extra.extend(format_type_descriptor(2, 16, &[44_100, 48_000]));

        let format = parse_format_type(&extra).unwrap();
        assert_eq!(format.channels, 2);
        assert_eq!(format.subframe_size, 2);
        assert_eq!(format.bit_resolution, 16);
        assert_eq!(format.sample_rates, vec![44_100, 48_000]);
    }

    #[test]
    fn test_parse_format_type_continuous() {
        let mut d = format_type_descriptor(1, 24, &[8_000, 96_000]);
        d[7] = 0;
        let format = parse_format_type(&d).unwrap();
        assert_eq!(format.sample_rates, vec![8_000, 96_000]);
    }

    #[test]
    fn test_parse_format_type_truncated() {
        let mut d = format_type_descriptor(2, 16, &[48_000]);
        d[0] = 40;
        assert!(parse_format_type(&d).is_none());
        assert!(parse_format_type(&[]).is_none());
        assert!(parse_format_type(&[0, 0, 0]).is_none());
    }

    #[test]
    fn test_parse_feature_unit() {
        let extra = vec![
            // unit 5: volume only
            8, CS_INTERFACE, AC_FEATURE_UNIT, 5, 1, 1, 0x02, 0,
            // unit 2: mute + volume
            8, CS_INTERFACE, AC_FEATURE_UNIT, 2, 1, 1, 0x03, 0,
        ];

        let preferred = parse_feature_unit(&extra, 2).unwrap();
        assert_eq!(
            preferred,
            FeatureUnit {
                unit_id: 2,
                mute: true,
                volume: true
            }
        );

        let fallback = parse_feature_unit(&extra, 9).unwrap();
        assert_eq!(fallback.unit_id, 5);
        assert!(!fallback.mute);
        assert!(fallback.volume);

        assert!(parse_feature_unit(&[], 2).is_none());
    }

    #[test]
    fn test_class_descriptors_stop_on_bad_length() {
        let extra = [3, CS_INTERFACE, 0x01, 1, 0x00, 0x00];
        let descriptors: Vec<&[u8]> = class_descriptors(&extra).collect();
        assert_eq!(descriptors.len(), 1);
    }
}
