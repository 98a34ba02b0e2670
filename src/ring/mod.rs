//! Ring transport: the memory-mapped submission and completion rings.
//!
//! The queues in this module never block and never allocate. Index ownership
//! follows the kernel protocol:
//!
//! | index             | written by  | store     | read by     | load      |
//! |-------------------|-------------|-----------|-------------|-----------|
//! | SQ tail           | user space  | `Release` | kernel      | acquire   |
//! | SQ head           | kernel      | release   | user space  | `Acquire` |
//! | CQ tail           | kernel      | release   | user space  | `Acquire` |
//! | CQ head           | user space  | `Release` | kernel      | acquire   |

mod completion;
mod mmap;
mod submission;
mod transport;


pub use completion::{CompletionQueue, Drain};
pub use mmap::Mmap;
pub use submission::{SlotHandle, SubmissionQueue};
pub use transport::{io_uring_enter, io_uring_setup, RingTransport};
