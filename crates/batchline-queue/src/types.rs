/// One message handed out by a `Receive` call.
///
/// The `receipt` is a fresh, single-use token: `ExtendVisibility` and
/// `Delete` operate on it, never on `id`, so a message redelivered after
/// a lost receipt cannot be acknowledged by the consumer that lost it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: String,
    pub queue: String,
    pub body: String,
    pub receipt: String,
    pub receive_count: u32,
}
