pub use super::reader_semaphore::Entity as ReaderSemaphore;
pub use super::reader_semaphore_slot::Entity as ReaderSemaphoreSlot;
pub use super::semaphore::Entity as Semaphore;
pub use super::semaphore_slot::Entity as SemaphoreSlot;
pub use super::writer_lock::Entity as WriterLock;
