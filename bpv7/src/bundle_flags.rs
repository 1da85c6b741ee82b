//! Bundle processing control flags (RFC 9171 §4.2.3).

use super::*;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct BundleFlags {
    pub is_fragment: bool,
    pub is_admin_record: bool,
    pub do_not_fragment: bool,
    pub app_ack_requested: bool,
    pub report_status_time: bool,
    pub receipt_report_requested: bool,
    pub forward_report_requested: bool,
    pub delivery_report_requested: bool,
    pub delete_report_requested: bool,

    pub unrecognised: Option<u64>,
}

impl BundleFlags {
    /// `true` if any status-report request flag is set.
    pub fn any_report_requested(&self) -> bool {
        self.receipt_report_requested
            || self.forward_report_requested
            || self.delivery_report_requested
            || self.delete_report_requested
    }
}

const FRAGMENT: u64 = 1 << 0;
const ADMIN_RECORD: u64 = 1 << 1;
const NO_FRAGMENT: u64 = 1 << 2;
const APP_ACK: u64 = 1 << 5;
const STATUS_TIME: u64 = 1 << 6;
const RECEIPT_REPORT: u64 = 1 << 14;
const FORWARD_REPORT: u64 = 1 << 16;
const DELIVERY_REPORT: u64 = 1 << 17;
const DELETE_REPORT: u64 = 1 << 18;

const ALL_KNOWN: u64 = FRAGMENT
    | ADMIN_RECORD
    | NO_FRAGMENT
    | APP_ACK
    | STATUS_TIME
    | RECEIPT_REPORT
    | FORWARD_REPORT
    | DELIVERY_REPORT
    | DELETE_REPORT;

impl From<&BundleFlags> for u64 {
    fn from(value: &BundleFlags) -> Self {
        let mut flags = value.unrecognised.unwrap_or_default();
        if value.is_fragment {
            flags |= FRAGMENT;
        }
        if value.is_admin_record {
            flags |= ADMIN_RECORD;
        }
        if value.do_not_fragment {
            flags |= NO_FRAGMENT;
        }
        if value.app_ack_requested {
            flags |= APP_ACK;
        }
        if value.report_status_time {
            flags |= STATUS_TIME;
        }
        if value.receipt_report_requested {
            flags |= RECEIPT_REPORT;
        }
        if value.forward_report_requested {
            flags |= FORWARD_REPORT;
        }
        if value.delivery_report_requested {
            flags |= DELIVERY_REPORT;
        }
        if value.delete_report_requested {
            flags |= DELETE_REPORT;
        }
        flags
    }
}

impl From<u64> for BundleFlags {
    fn from(value: u64) -> Self {
        let mut flags = Self {
            is_fragment: value & FRAGMENT != 0,
            is_admin_record: value & ADMIN_RECORD != 0,
            do_not_fragment: value & NO_FRAGMENT != 0,
            app_ack_requested: value & APP_ACK != 0,
            report_status_time: value & STATUS_TIME != 0,
            receipt_report_requested: value & RECEIPT_REPORT != 0,
            forward_report_requested: value & FORWARD_REPORT != 0,
            delivery_report_requested: value & DELIVERY_REPORT != 0,
            delete_report_requested: value & DELETE_REPORT != 0,
            unrecognised: None,
        };
        let unrecognised = value & !ALL_KNOWN;
        if unrecognised != 0 {
            flags.unrecognised = Some(unrecognised);
        }
        flags
    }
}

impl cbor::encode::Encode for BundleFlags {
    fn encode(&self, encoder: &mut cbor::encode::Encoder) {
        encoder.emit(&u64::from(self))
    }
}

impl cbor::decode::Decode for BundleFlags {
    type Error = cbor::decode::Error;

    fn decode(decoder: &mut cbor::decode::Decoder<'_>) -> Result<Self, Self::Error> {
        decoder.pull_uint().map(Into::into)
    }
}
