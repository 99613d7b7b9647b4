//! Gross versus net performance

use serde::{Deserialize, Serialize};

use super::irr::{calculate_irr, paid_in, IrrResult};
use super::returns::{equity_multiple, roi, total_distributions};
use crate::cashflows::{CashFlowLedger, FlowKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeDrag {
    pub gross_irr: IrrResult,
    pub gross_multiple: f64,
    pub gross_roi: f64,
    pub irr_drag: f64,
    pub multiple_drag: f64,
    pub roi_drag: f64,
    /// Drag as a fraction of the gross value; 0.0 when the gross value is zero
    pub irr_drag_pct: f64,
    pub multiple_drag_pct: f64,
    pub roi_drag_pct: f64,
}

fn share_of(drag: f64, gross: f64) -> f64 {
    if gross.abs() > f64::EPSILON {
        drag / gross.abs()
    } else {
        0.0
    }
}

/// Compare the gross series against net figures already computed
pub fn calculate_fee_drag(ledger: &CashFlowLedger, net_irr: f64, net_multiple: f64, net_roi: f64) -> FeeDrag {
    let gross_irr = calculate_irr(ledger, FlowKey::Gross);
    let gross_flows = ledger.flows(FlowKey::Gross);
    let gross_paid_in = paid_in(ledger, FlowKey::Gross);
    let gross_multiple = equity_multiple(&gross_flows, gross_paid_in);
    let gross_roi = roi(total_distributions(&gross_flows), gross_paid_in);

    let irr_drag = gross_irr.value - net_irr;
    let multiple_drag = gross_multiple - net_multiple;
    let roi_drag = gross_roi - net_roi;

    FeeDrag {
        irr_drag_pct: share_of(irr_drag, gross_irr.value),
        multiple_drag_pct: share_of(multiple_drag, gross_multiple),
        roi_drag_pct: share_of(roi_drag, gross_roi),
        gross_irr,
        gross_multiple,
        gross_roi,
        irr_drag,
        multiple_drag,
        roi_drag,
    }
}
