use serde::Serialize;

/// Appointment status codes as stored in `appointment.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum AppointmentStatus {
    Accepted = 1,
    Pending = 2,
    Canceled = 3,
    Completed = 4,
    Rejected = 5,
    Rescheduled = 6,
}

/// Statuses that hold a slot, as a SQL list literal for `status IN (...)`.
pub const OCCUPYING_SQL: &str = "(1, 2, 6)";

/// Statuses that stop a patient from booking a second visit on the same day.
pub const SAME_DAY_BLOCKING_SQL: &str = "(1, 2, 4, 6)";

impl AppointmentStatus {
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            1 => Some(Self::Accepted),
            2 => Some(Self::Pending),
            3 => Some(Self::Canceled),
            4 => Some(Self::Completed),
            5 => Some(Self::Rejected),
            6 => Some(Self::Rescheduled),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Pending => "Pending",
            Self::Canceled => "Canceled",
            Self::Completed => "Completed",
            Self::Rejected => "Rejected",
            Self::Rescheduled => "Rescheduled",
        }
    }

    pub fn occupies_slot(self) -> bool {
        matches!(self, Self::Accepted | Self::Pending | Self::Rescheduled)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Completed | Self::Rejected)
    }

    pub fn patient_can_reschedule(self) -> bool {
        matches!(self, Self::Accepted | Self::Pending)
    }

    pub fn can_cancel(self) -> bool {
        self.occupies_slot()
    }

    /// Transitions staff may apply through the status endpoint.
    pub fn staff_can_move_to(self, next: Self) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Rejected)
                | (Pending, Canceled)
                | (Accepted, Completed)
                | (Accepted, Canceled)
                | (Rescheduled, Accepted)
                | (Rescheduled, Rejected)
                | (Rescheduled, Canceled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    const ALL: [AppointmentStatus; 6] = [Accepted, Pending, Canceled, Completed, Rejected, Rescheduled];

    // Completed visits still count towards the one-visit-per-day rule.
    fn blocks_same_day(s: AppointmentStatus) -> bool {
        !matches!(s, Canceled | Rejected)
    }

    #[test]
    fn codes_match_status_table() {
        for s in ALL {
            assert_eq!(AppointmentStatus::from_i16(s.as_i16()), Some(s));
        }
        assert_eq!(AppointmentStatus::from_i16(0), None);
        assert_eq!(AppointmentStatus::from_i16(7), None);
        assert_eq!(Rescheduled.as_i16(), 6);
    }

    #[test]
    fn sql_lists_agree_with_predicates() {
        let occupying: Vec<String> = ALL
            .iter()
            .filter(|s| s.occupies_slot())
            .map(|s| s.as_i16().to_string())
            .collect();
        assert_eq!(format!("({})", occupying.join(", ")), OCCUPYING_SQL);

        let blocking: Vec<String> = ALL
            .iter()
            .filter(|s| blocks_same_day(**s))
            .map(|s| s.as_i16().to_string())
            .collect();
        assert_eq!(format!("({})", blocking.join(", ")), SAME_DAY_BLOCKING_SQL);
    }

    #[test]
    fn patient_actions() {
        assert!(Pending.patient_can_reschedule());
        assert!(Accepted.patient_can_reschedule());
        assert!(!Rescheduled.patient_can_reschedule());
        assert!(Rescheduled.can_cancel());
        assert!(!Completed.can_cancel());
        assert!(!Canceled.can_cancel());
    }

    #[test]
    fn terminal_states_go_nowhere() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.staff_can_move_to(to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn staff_review_flow() {
        assert!(Pending.staff_can_move_to(Accepted));
        assert!(Accepted.staff_can_move_to(Completed));
        assert!(!Pending.staff_can_move_to(Completed));
        assert!(!Accepted.staff_can_move_to(Pending));
        assert!(Rescheduled.staff_can_move_to(Accepted));
        assert!(!Accepted.staff_can_move_to(Rescheduled));
    }
}
