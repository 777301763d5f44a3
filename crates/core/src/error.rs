use thiserror::Error;

use crate::model::{
    CourseError, MaterialError, ParseIdError, PaymentError, QuizError, SessionStateError,
    SubscriptionError, UserError,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Course(#[from] CourseError),
    #[error(transparent)]
    Material(#[from] MaterialError),
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Session(#[from] SessionStateError),
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}
