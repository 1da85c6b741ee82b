//! Administrative records and bundle status reports.
//!
//! An administrative record is a bundle payload of the form
//! `[record-type, record-content]`. The only record type implemented is the
//! bundle status report (type 1), whose status-informations array always
//! has the fixed length four: received, forwarded, delivered, deleted.

use super::*;
use bundle::Bundle;
use bundle_id::{BundleId, FragmentInfo};
use dtn_time::DtnTime;
use eid::Eid;
use error::CaptureFieldErr;

const RECORD_TYPE_STATUS_REPORT: u64 = 1;

/// Status report reason codes (RFC 9171 §9.4).
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ReasonCode {
    #[default]
    NoAdditionalInformation,
    LifetimeExpired,
    ForwardedOverUnidirectionalLink,
    TransmissionCanceled,
    DepletedStorage,
    DestinationEndpointUnintelligible,
    NoKnownRouteToDestination,
    NoTimelyContactWithNextNodeOnRoute,
    BlockUnintelligible,
    HopLimitExceeded,
    TrafficPared,
    BlockUnsupported,
    Unassigned(u64),
}

impl From<u64> for ReasonCode {
    fn from(value: u64) -> Self {
        match value {
            0 => Self::NoAdditionalInformation,
            1 => Self::LifetimeExpired,
            2 => Self::ForwardedOverUnidirectionalLink,
            3 => Self::TransmissionCanceled,
            4 => Self::DepletedStorage,
            5 => Self::DestinationEndpointUnintelligible,
            6 => Self::NoKnownRouteToDestination,
            7 => Self::NoTimelyContactWithNextNodeOnRoute,
            8 => Self::BlockUnintelligible,
            9 => Self::HopLimitExceeded,
            10 => Self::TrafficPared,
            11 => Self::BlockUnsupported,
            value => Self::Unassigned(value),
        }
    }
}

impl From<ReasonCode> for u64 {
    fn from(value: ReasonCode) -> Self {
        match value {
            ReasonCode::NoAdditionalInformation => 0,
            ReasonCode::LifetimeExpired => 1,
            ReasonCode::ForwardedOverUnidirectionalLink => 2,
            ReasonCode::TransmissionCanceled => 3,
            ReasonCode::DepletedStorage => 4,
            ReasonCode::DestinationEndpointUnintelligible => 5,
            ReasonCode::NoKnownRouteToDestination => 6,
            ReasonCode::NoTimelyContactWithNextNodeOnRoute => 7,
            ReasonCode::BlockUnintelligible => 8,
            ReasonCode::HopLimitExceeded => 9,
            ReasonCode::TrafficPared => 10,
            ReasonCode::BlockUnsupported => 11,
            ReasonCode::Unassigned(value) => value,
        }
    }
}

/// One entry of the status-informations array.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    pub asserted: bool,
    /// Present only when the referenced bundle requested status times.
    pub timestamp: Option<DtnTime>,
}

impl StatusInfo {
    pub fn asserted(timestamp: Option<DtnTime>) -> Self {
        Self {
            asserted: true,
            timestamp,
        }
    }
}

impl cbor::encode::Encode for StatusInfo {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        match (self.asserted, self.timestamp) {
            (true, Some(t)) => encoder.emit_array(Some(2), |a| {
                a.emit(&true);
                a.emit(&t);
            }),
            (asserted, _) => encoder.emit_array(Some(1), |a| {
                a.emit(&asserted);
            }),
        }
    }
}

impl cbor::decode::Decode for StatusInfo {
    type Error = cbor::decode::Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_array(|a| {
            let asserted = a.pull_bool()?;
            let timestamp = if !a.at_end()? { Some(a.parse()?) } else { None };
            Ok(Self {
                asserted,
                timestamp,
            })
        })
    }
}

/// The four status assertions a report can carry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusKind {
    Received,
    Forwarded,
    Delivered,
    Deleted,
}

/// A bundle status report referencing another bundle by identifier.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatusReport {
    pub received: StatusInfo,
    pub forwarded: StatusInfo,
    pub delivered: StatusInfo,
    pub deleted: StatusInfo,
    pub reason: ReasonCode,
    pub bundle_id: BundleId,
}

impl StatusReport {
    /// A report asserting `kind` about `bundle`. The timestamp is included
    /// only when the referenced bundle requested status times.
    pub fn new(
        bundle: &Bundle,
        kind: StatusKind,
        reason: ReasonCode,
        timestamp: DtnTime,
    ) -> Self {
        let info = StatusInfo::asserted(bundle.primary.flags.report_status_time.then_some(timestamp));
        let mut report = Self {
            reason,
            bundle_id: bundle.id(),
            ..Default::default()
        };
        match kind {
            StatusKind::Received => report.received = info,
            StatusKind::Forwarded => report.forwarded = info,
            StatusKind::Delivered => report.delivered = info,
            StatusKind::Deleted => report.deleted = info,
        }
        report
    }

    pub fn asserted(&self, kind: StatusKind) -> bool {
        match kind {
            StatusKind::Received => self.received.asserted,
            StatusKind::Forwarded => self.forwarded.asserted,
            StatusKind::Delivered => self.delivered.asserted,
            StatusKind::Deleted => self.deleted.asserted,
        }
    }
}

impl cbor::encode::Encode for StatusReport {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        let count = if self.bundle_id.fragment.is_some() { 6 } else { 4 };
        encoder.emit_array(Some(count), |a| {
            a.emit_array(Some(4), |a| {
                a.emit(&self.received);
                a.emit(&self.forwarded);
                a.emit(&self.delivered);
                a.emit(&self.deleted);
            });
            a.emit(&u64::from(self.reason));
            a.emit(&self.bundle_id.source);
            a.emit(&self.bundle_id.timestamp);
            if let Some(fragment) = &self.bundle_id.fragment {
                a.emit(&fragment.offset);
                a.emit(&fragment.total_len);
            }
        })
    }
}

impl cbor::decode::Decode for StatusReport {
    type Error = Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_array(|a| {
            let (received, forwarded, delivered, deleted) = a.pull_array(|a| {
                Ok::<_, Error>((
                    a.parse().map_field_err("received status")?,
                    a.parse().map_field_err("forwarded status")?,
                    a.parse().map_field_err("delivered status")?,
                    a.parse().map_field_err("deleted status")?,
                ))
            })?;
            let reason = ReasonCode::from(a.pull_uint().map_field_err("reason code")?);
            let source: Eid = a.parse().map_field_err("source EID")?;
            let timestamp = a.parse().map_field_err("creation timestamp")?;
            let fragment = if !a.at_end()? {
                Some(FragmentInfo {
                    offset: a.pull_uint().map_field_err("fragment offset")?,
                    total_len: a.pull_uint().map_field_err("total application data unit length")?,
                })
            } else {
                None
            };
            Ok(Self {
                received,
                forwarded,
                delivered,
                deleted,
                reason,
                bundle_id: BundleId {
                    source,
                    timestamp,
                    fragment,
                },
            })
        })
    }
}

/// A bundle payload carrying protocol control information.
#[derive(Debug, Clone, PartialEq)]
pub enum AdministrativeRecord {
    StatusReport(StatusReport),
    Unrecognised(u64, Vec<u8>),
}

impl AdministrativeRecord {
    /// Serialises the record as bundle payload bytes.
    pub fn to_payload(&self) -> Vec<u8> {
        cbor::encode::emit_array(Some(2), |a| match self {
            AdministrativeRecord::StatusReport(report) => {
                a.emit(&RECORD_TYPE_STATUS_REPORT);
                a.emit(report);
            }
            AdministrativeRecord::Unrecognised(record_type, content) => {
                a.emit(record_type);
                a.emit_raw(content);
            }
        })
    }

    pub fn from_payload(data: &[u8]) -> Result<Self, Error> {
        let mut decoder = cbor::decode::Decoder::new(data);
        let record = decoder.pull_array(|a| -> Result<AdministrativeRecord, Error> {
            match a.pull_uint().map_field_err("record type code")? {
                RECORD_TYPE_STATUS_REPORT => {
                    Ok(AdministrativeRecord::StatusReport(a.parse()?))
                }
                record_type => {
                    let start = a.position();
                    a.skip_value()?;
                    let end = a.position();
                    Ok(AdministrativeRecord::Unrecognised(
                        record_type,
                        data[start..end].to_vec(),
                    ))
                }
            }
        })?;
        if !decoder.is_exhausted() {
            return Err(Error::AdditionalData);
        }
        Ok(record)
    }

    /// Extracts the record from an administrative bundle.
    pub fn from_bundle(bundle: &Bundle) -> Result<Self, Error> {
        if !bundle.is_admin_record() {
            return Err(Error::NotAdministrativeRecord);
        }
        Self::from_payload(bundle.payload().ok_or(Error::MissingPayload)?)
    }
}
