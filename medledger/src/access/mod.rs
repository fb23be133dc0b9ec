//! アクセス判定
//!
//! I/Oやロックを持たない純粋関数。呼び出し側がストアから読んだ値を渡す。

pub mod types;

pub use types::{
    AccessPolicy, AccessSubject, Decision, DenyReason, DoctorReadPolicy, Entity, Operation, Target,
};

use chrono::{DateTime, Utc};

use crate::common::types::{Doctor, Patient};

/// 操作が許可されるか判定する
///
/// # Arguments
/// * `op` - 操作
/// * `subject` - プロファイル解決済みのアクター
/// * `target` - 操作対象
/// * `now` - 判定時刻（予約日時・閲覧許可の期限比較に使う）
/// * `policy` - アクセスポリシー
pub fn evaluate(
    op: Operation,
    subject: &AccessSubject,
    target: &Target<'_>,
    now: DateTime<Utc>,
    policy: &AccessPolicy,
) -> Decision {
    match op {
        Operation::ReadOwnRecords | Operation::RespondAccessRequest => {
            let patient = match require_patient(subject) {
                Ok(patient) => patient,
                Err(decision) => return decision,
            };
            evaluate_for_patient(op, patient, target, now)
        }
        Operation::ReadOwnAppointments => match subject {
            AccessSubject::Doctor(Some(_)) | AccessSubject::Patient(Some(_)) => Decision::Allowed,
            AccessSubject::Doctor(None) => Decision::NotFound(Entity::Doctor),
            AccessSubject::Patient(None) => Decision::NotFound(Entity::Patient),
        },
        _ => {
            let doctor = match require_doctor(subject) {
                Ok(doctor) => doctor,
                Err(decision) => return decision,
            };
            evaluate_for_doctor(op, doctor, target, now, policy)
        }
    }
}

fn require_doctor(subject: &AccessSubject) -> Result<&Doctor, Decision> {
    match subject {
        AccessSubject::Doctor(Some(doctor)) => Ok(doctor),
        AccessSubject::Doctor(None) => Err(Decision::NotFound(Entity::Doctor)),
        AccessSubject::Patient(_) => Err(Decision::Denied(DenyReason::NotADoctor)),
    }
}

fn require_patient(subject: &AccessSubject) -> Result<&Patient, Decision> {
    match subject {
        AccessSubject::Patient(Some(patient)) => Ok(patient),
        AccessSubject::Patient(None) => Err(Decision::NotFound(Entity::Patient)),
        AccessSubject::Doctor(_) => Err(Decision::Denied(DenyReason::NotAPatient)),
    }
}

fn evaluate_for_patient(
    op: Operation,
    patient: &Patient,
    target: &Target<'_>,
    now: DateTime<Utc>,
) -> Decision {
    match op {
        Operation::RespondAccessRequest => {
            let Some(request) = target.grant else {
                return Decision::NotFound(Entity::AccessRequest);
            };
            if request.patient_id != patient.patient_id {
                return Decision::Denied(DenyReason::NotAddressee);
            }
            if !request.is_pending_at(now) {
                return Decision::Denied(DenyReason::RequestClosed);
            }
            Decision::Allowed
        }
        Operation::ReadOwnRecords | Operation::ReadOwnAppointments => Decision::Allowed,
        _ => Decision::Denied(DenyReason::NotADoctor),
    }
}

fn evaluate_for_doctor(
    op: Operation,
    doctor: &Doctor,
    target: &Target<'_>,
    now: DateTime<Utc>,
    policy: &AccessPolicy,
) -> Decision {
    match op {
        Operation::CreateRecord | Operation::RequestAccess => match target.patient {
            Some(_) => Decision::Allowed,
            None => Decision::NotFound(Entity::Patient),
        },
        Operation::UpdateRecord | Operation::DeleteRecord => match target.record {
            None => Decision::NotFound(Entity::Record),
            Some(record) if record.doctor_id != doctor.doctor_id => {
                Decision::Denied(DenyReason::NotOwner)
            }
            Some(_) => Decision::Allowed,
        },
        Operation::ReadRecordsByPatient => {
            let Some(patient) = target.patient else {
                return Decision::NotFound(Entity::Patient);
            };
            match policy.doctor_read {
                DoctorReadPolicy::Open => Decision::Allowed,
                DoctorReadPolicy::RequireGrant => {
                    let active = target.grant.is_some_and(|grant| {
                        grant.doctor_id == doctor.doctor_id
                            && grant.patient_id == patient.patient_id
                            && grant.is_active_at(now)
                    });
                    if active {
                        Decision::Allowed
                    } else {
                        Decision::Denied(DenyReason::NoActiveGrant)
                    }
                }
            }
        }
        Operation::CreateAppointment => {
            if target.patient.is_none() {
                return Decision::NotFound(Entity::Patient);
            }
            match target.date {
                Some(date) if date > now => Decision::Allowed,
                _ => Decision::Denied(DenyReason::DateNotInFuture),
            }
        }
        Operation::RescheduleAppointment | Operation::CancelAppointment => {
            let Some(appointment) = target.appointment else {
                return Decision::NotFound(Entity::Appointment);
            };
            if appointment.doctor_id != doctor.doctor_id {
                return Decision::Denied(DenyReason::NotOwner);
            }
            if appointment.date <= now {
                return Decision::Denied(DenyReason::AppointmentInPast);
            }
            if op == Operation::RescheduleAppointment
                && !target.date.is_some_and(|date| date > now)
            {
                return Decision::Denied(DenyReason::DateNotInFuture);
            }
            Decision::Allowed
        }
        Operation::ReadOwnAppointments => Decision::Allowed,
        Operation::ReadOwnRecords | Operation::RespondAccessRequest => {
            Decision::Denied(DenyReason::NotAPatient)
        }
    }
}
